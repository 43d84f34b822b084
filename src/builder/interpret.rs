use std::collections::BTreeMap;

use super::BuildState;
use crate::descriptor::{parse_field_descriptor, parse_internal_name, parse_method_descriptor};
use crate::error::{BuildError, BuildResult};
use crate::frame::Frame;
use crate::ir::{
    ArrayAccess, BootstrapValue, Call, Condition, ConditionOp, Constant, DynamicCall, Expr,
    FieldRef, Inst, IrLabel, LocalVar, MethodCall, MethodHandleRef, Place, Value,
};
use crate::method::{
    BootstrapArg, CallKind, DupOp, FieldOp, Handle, HandleKind, Insn, JumpOp, LabelId, LdcConstant,
    Literal,
};
use crate::types::{
    METHOD_HANDLES_CLASS, METHOD_HANDLES_LOOKUP_CLASS, TypeName, binary_result_type,
    negation_result_type,
};

/// Right operand of a conditional jump.
enum Comparand {
    Zero,
    Null,
    Stack,
}

fn condition_of(op: JumpOp) -> Option<(ConditionOp, Comparand)> {
    use ConditionOp::*;

    Some(match op {
        JumpOp::Goto => return None,
        JumpOp::IfEq => (Eq, Comparand::Zero),
        JumpOp::IfNe => (Neq, Comparand::Zero),
        JumpOp::IfLt => (Lt, Comparand::Zero),
        JumpOp::IfGe => (Ge, Comparand::Zero),
        JumpOp::IfGt => (Gt, Comparand::Zero),
        JumpOp::IfLe => (Le, Comparand::Zero),
        JumpOp::IfICmpEq | JumpOp::IfACmpEq => (Eq, Comparand::Stack),
        JumpOp::IfICmpNe | JumpOp::IfACmpNe => (Neq, Comparand::Stack),
        JumpOp::IfICmpLt => (Lt, Comparand::Stack),
        JumpOp::IfICmpGe => (Ge, Comparand::Stack),
        JumpOp::IfICmpGt => (Gt, Comparand::Stack),
        JumpOp::IfICmpLe => (Le, Comparand::Stack),
        JumpOp::IfNull => (Eq, Comparand::Null),
        JumpOp::IfNonNull => (Neq, Comparand::Null),
    })
}

impl BuildState<'_> {
    /// Symbolically execute one non-label instruction against `frame`.
    pub(super) fn interpret(&mut self, node: usize, insn: &Insn, frame: &mut Frame) -> BuildResult<()> {
        match insn {
            // Labels and frame hints are handled by `visit`.
            Insn::Label(_) | Insn::Frame(_) | Insn::Nop => {}
            Insn::LineNumber { line, start } => {
                let start = self.label_or_fresh(*start)?;
                self.emit(node, Inst::LineNumber { line: *line, start });
            }

            Insn::Const(literal) => frame.push(Value::Const(literal_constant(*literal))),
            Insn::Push(value) => frame.push(Value::Const(Constant::Int(*value))),
            Insn::Ldc(constant) => self.load_constant(node, constant, frame)?,

            Insn::Pop => {
                frame.pop(node)?;
            }
            Insn::Pop2 => {
                let top = frame.pop(node)?;
                if !top.ty().is_dword() {
                    frame.pop(node)?;
                }
            }
            Insn::Dup(op) => duplicate(node, *op, frame)?,
            Insn::Swap => {
                let top = frame.pop(node)?;
                let below = frame.pop(node)?;
                frame.push(top);
                frame.push(below);
            }

            Insn::Binary(op) => {
                let rhs = frame.pop(node)?;
                let lhs = frame.pop(node)?;
                let ty = binary_result_type(&lhs.ty(), &rhs.ty());
                let expr = Expr::Binary {
                    op: *op,
                    ty: ty.clone(),
                    lhs,
                    rhs,
                };
                self.push_assigned(node, ty, expr, frame);
            }
            Insn::Neg => {
                let operand = frame.pop(node)?;
                let ty = negation_result_type(&operand.ty());
                let expr = Expr::Neg {
                    ty: ty.clone(),
                    operand,
                };
                self.push_assigned(node, ty, expr, frame);
            }
            Insn::Convert(primitive) => {
                let operand = frame.pop(node)?;
                let ty = TypeName::Primitive(*primitive);
                let expr = Expr::Cast {
                    ty: ty.clone(),
                    operand,
                };
                self.push_assigned(node, ty, expr, frame);
            }
            Insn::Compare(op) => {
                let rhs = frame.pop(node)?;
                let lhs = frame.pop(node)?;
                let expr = Expr::Compare { op: *op, lhs, rhs };
                self.push_assigned(node, TypeName::INT, expr, frame);
            }

            Insn::Return => self.emit(node, Inst::Return(None)),
            Insn::ReturnValue => {
                let value = frame.pop(node)?;
                self.emit(node, Inst::Return(Some(value)));
            }
            Insn::Throw => {
                let value = frame.pop(node)?;
                self.emit(node, Inst::Throw(value));
            }
            Insn::MonitorEnter => {
                let value = frame.pop(node)?;
                self.emit(node, Inst::EnterMonitor(value));
            }
            Insn::MonitorExit => {
                let value = frame.pop(node)?;
                self.emit(node, Inst::ExitMonitor(value));
            }

            Insn::Load(slot) => frame.push(frame.load(*slot, node)?),
            Insn::Store(slot) => {
                let value = frame.pop(node)?;
                self.store(node, *slot, value, frame)?;
            }
            Insn::Iinc { index, increment } => {
                let local = frame.load(*index, node)?;
                let ty = binary_result_type(&local.ty(), &TypeName::INT);
                let sum = self.fresh_temp(ty.clone());
                self.emit(
                    node,
                    Inst::assign(
                        sum.clone(),
                        Expr::Binary {
                            op: crate::method::BinaryOp::Add,
                            ty,
                            lhs: local,
                            rhs: Value::Const(Constant::Int(*increment)),
                        },
                    ),
                );
                self.store(node, *index, Value::Local(sum), frame)?;
            }

            Insn::ArrayLength => {
                let array = frame.pop(node)?;
                self.push_assigned(node, TypeName::INT, Expr::Length(array), frame);
            }
            Insn::ArrayLoad(_) => {
                let index = frame.pop(node)?;
                let array = frame.pop(node)?;
                let ty = array.ty().element_type();
                let access = ArrayAccess {
                    array,
                    index,
                    ty: ty.clone(),
                };
                self.push_assigned(node, ty, Expr::ArrayElement(access), frame);
            }
            Insn::ArrayStore(_) => {
                let value = frame.pop(node)?;
                let index = frame.pop(node)?;
                let array = frame.pop(node)?;
                let ty = array.ty().element_type();
                self.emit(
                    node,
                    Inst::Assign {
                        lhs: Place::ArrayElement(ArrayAccess { array, index, ty }),
                        rhs: Expr::Value(value),
                    },
                );
            }

            Insn::New(name) => {
                let ty = parse_internal_name(name)?;
                self.push_assigned(node, ty.clone(), Expr::New(ty), frame);
            }
            Insn::NewPrimitiveArray(primitive) => {
                let length = frame.pop(node)?;
                let ty = TypeName::Primitive(*primitive).as_array();
                let expr = Expr::NewArray {
                    ty: ty.clone(),
                    dimensions: vec![length],
                };
                self.push_assigned(node, ty, expr, frame);
            }
            Insn::NewObjectArray(name) => {
                let length = frame.pop(node)?;
                let ty = parse_internal_name(name)?.as_array();
                let expr = Expr::NewArray {
                    ty: ty.clone(),
                    dimensions: vec![length],
                };
                self.push_assigned(node, ty, expr, frame);
            }
            Insn::MultiNewArray {
                descriptor,
                dimensions,
            } => {
                let ty = parse_field_descriptor(descriptor)?;
                let dimensions = pop_many(node, usize::from(*dimensions), frame)?;
                let expr = Expr::NewArray {
                    ty: ty.clone(),
                    dimensions,
                };
                self.push_assigned(node, ty, expr, frame);
            }
            Insn::CheckCast(name) => {
                let operand = frame.pop(node)?;
                let ty = parse_internal_name(name)?;
                let expr = Expr::Cast {
                    ty: ty.clone(),
                    operand,
                };
                self.push_assigned(node, ty, expr, frame);
            }
            Insn::InstanceOf(name) => {
                let operand = frame.pop(node)?;
                let expr = Expr::InstanceOf {
                    operand,
                    target: parse_internal_name(name)?,
                };
                self.push_assigned(node, TypeName::BOOLEAN, expr, frame);
            }

            Insn::Field {
                op,
                owner,
                name,
                descriptor,
            } => {
                let owner = parse_internal_name(owner)?;
                let ty = parse_field_descriptor(descriptor)?;
                let field = |instance| FieldRef {
                    instance,
                    owner: owner.clone(),
                    name: name.clone(),
                    ty: ty.clone(),
                };
                match op {
                    FieldOp::GetField => {
                        let instance = frame.pop(node)?;
                        let expr = Expr::Field(field(Some(instance)));
                        self.push_assigned(node, ty.clone(), expr, frame);
                    }
                    FieldOp::GetStatic => {
                        let expr = Expr::Field(field(None));
                        self.push_assigned(node, ty.clone(), expr, frame);
                    }
                    FieldOp::PutField => {
                        let value = frame.pop(node)?;
                        let instance = frame.pop(node)?;
                        let lhs = Place::Field(field(Some(instance)));
                        self.emit(node, Inst::Assign { lhs, rhs: Expr::Value(value) });
                    }
                    FieldOp::PutStatic => {
                        let value = frame.pop(node)?;
                        let lhs = Place::Field(field(None));
                        self.emit(node, Inst::Assign { lhs, rhs: Expr::Value(value) });
                    }
                }
            }

            Insn::Invoke {
                kind,
                owner,
                name,
                descriptor,
                interface,
            } => {
                let method_type = parse_method_descriptor(descriptor)?;
                let args = pop_many(node, method_type.parameters.len(), frame)?;
                let instance = match kind {
                    CallKind::Static => None,
                    _ => Some(frame.pop(node)?),
                };
                let owner = match parse_internal_name(owner)? {
                    array if array.is_array() => TypeName::object(),
                    owner => owner,
                };
                let call = Call::Method(MethodCall {
                    kind: *kind,
                    owner,
                    name: name.clone(),
                    parameter_types: method_type.parameters,
                    return_type: method_type.return_type,
                    instance,
                    args,
                    interface: *interface,
                });
                self.call(node, call, frame);
            }
            Insn::InvokeDynamic {
                name,
                descriptor,
                bootstrap,
                bootstrap_args,
            } => {
                let method_type = parse_method_descriptor(descriptor)?;
                let args = pop_many(node, method_type.parameters.len(), frame)?;
                let bootstrap = bootstrap_handle(name, bootstrap)?;
                let bootstrap_args = bootstrap_args
                    .iter()
                    .map(|arg| bootstrap_value(name, arg))
                    .collect::<BuildResult<Vec<_>>>()?;
                let call = Call::Dynamic(DynamicCall {
                    bootstrap,
                    bootstrap_args,
                    name: name.clone(),
                    parameter_types: method_type.parameters,
                    return_type: method_type.return_type,
                    args,
                });
                self.call(node, call, frame);
            }

            Insn::Jump { op, target } => {
                let true_branch = self.label(*target)?;
                let Some((op, comparand)) = condition_of(*op) else {
                    self.emit(node, Inst::Goto(true_branch));
                    return Ok(());
                };
                let top = frame.pop(node)?;
                let (lhs, rhs) = match comparand {
                    Comparand::Zero => {
                        let zero = Constant::zero_of(&top.ty());
                        (top, Value::Const(zero))
                    }
                    Comparand::Null => (top, Value::Const(Constant::Null)),
                    Comparand::Stack => (frame.pop(node)?, top),
                };
                let false_branch = self.false_branch(node)?;
                self.emit(
                    node,
                    Inst::If {
                        condition: Condition { op, lhs, rhs },
                        true_branch,
                        false_branch: false_branch.clone(),
                    },
                );
                if !matches!(self.body.instructions.get(node), Some(Insn::Label(_))) {
                    self.emit(node, Inst::Label(false_branch));
                }
            }
            Insn::TableSwitch {
                min,
                max,
                default,
                targets,
            } => {
                let key = frame.pop(node)?;
                let branches = self.branches((*min..=*max).zip(targets))?;
                let default = self.label(*default)?;
                self.emit(node, Inst::Switch { key, branches, default });
            }
            Insn::LookupSwitch {
                default,
                keys,
                targets,
            } => {
                let key = frame.pop(node)?;
                let branches = self.branches(keys.iter().copied().zip(targets))?;
                let default = self.label(*default)?;
                self.emit(node, Inst::Switch { key, branches, default });
            }
        }
        Ok(())
    }

    /// Label of the instruction after a conditional jump, or a fresh one
    /// that the caller places right after the `if`.
    fn false_branch(&mut self, node: usize) -> BuildResult<IrLabel> {
        match self.body.instructions.get(node) {
            Some(Insn::Label(label)) => self.label(*label),
            _ => Ok(self.fresh_label()),
        }
    }

    fn branches<'l>(
        &self,
        cases: impl Iterator<Item = (i32, &'l LabelId)>,
    ) -> BuildResult<BTreeMap<i32, IrLabel>> {
        cases
            .map(|(key, target)| Ok::<_, BuildError>((key, self.label(*target)?)))
            .collect()
    }

    fn push_assigned(&mut self, node: usize, ty: TypeName, expr: Expr, frame: &mut Frame) {
        let register = self.fresh_temp(ty);
        self.emit(node, Inst::assign(register.clone(), expr));
        frame.push(Value::Local(register));
    }

    fn call(&mut self, node: usize, call: Call, frame: &mut Frame) {
        if *call.return_type() == TypeName::VOID {
            self.emit(node, Inst::Call(call));
        } else {
            let ty = call.return_type().clone();
            self.push_assigned(node, ty, Expr::Call(call), frame);
        }
    }

    fn load_constant(&mut self, node: usize, constant: &LdcConstant, frame: &mut Frame) -> BuildResult<()> {
        let value = match constant {
            LdcConstant::Int(value) => Constant::Int(*value),
            LdcConstant::Long(value) => Constant::Long(*value),
            LdcConstant::Float(value) => Constant::Float(*value),
            LdcConstant::Double(value) => Constant::Double(*value),
            LdcConstant::String(value) => Constant::String(value.clone()),
            LdcConstant::Class(name) => {
                let constant = Constant::Class(parse_internal_name(name)?);
                self.push_assigned(node, constant.ty(), Value::Const(constant).into(), frame);
                return Ok(());
            }
            LdcConstant::MethodType(descriptor) => {
                let method_type = parse_method_descriptor(descriptor)?;
                let constant = Constant::MethodType {
                    parameters: method_type.parameters,
                    return_type: method_type.return_type,
                };
                self.push_assigned(node, constant.ty(), Value::Const(constant).into(), frame);
                return Ok(());
            }
            LdcConstant::Handle(handle) => {
                let constant = Constant::MethodHandle(handle_ref(handle)?);
                self.push_assigned(node, constant.ty(), Value::Const(constant).into(), frame);
                return Ok(());
            }
            LdcConstant::Dynamic {
                name,
                descriptor,
                bootstrap,
                bootstrap_args,
            } => {
                let result = self.dynamic_constant(node, name, descriptor, bootstrap, bootstrap_args)?;
                frame.push(Value::Local(result));
                return Ok(());
            }
        };
        frame.push(Value::Const(value));
        Ok(())
    }

    /// A dynamic constant becomes the bootstrap call that produces it. An
    /// `invokespecial` bootstrap is called on `this` directly; anything else is
    /// called statically with a fresh lookup, the constant's name and type.
    fn dynamic_constant(
        &mut self,
        node: usize,
        name: &str,
        descriptor: &str,
        bootstrap: &Handle,
        bootstrap_args: &[BootstrapArg],
    ) -> BuildResult<LocalVar> {
        let ty = parse_field_descriptor(descriptor)?;
        let result = self.fresh_temp(ty.clone());
        let handle = bootstrap_handle(name, bootstrap)?;
        let mut args = bootstrap_args
            .iter()
            .map(|arg| bootstrap_constant(name, arg).map(Value::Const))
            .collect::<BuildResult<Vec<_>>>()?;

        let call = if handle.kind == HandleKind::InvokeSpecial {
            MethodCall {
                kind: CallKind::Special,
                owner: handle.owner,
                name: name.to_string(),
                parameter_types: handle.parameter_types,
                return_type: handle.return_type,
                instance: Some(Value::This(self.this_type.clone())),
                args,
                interface: handle.interface,
            }
        } else {
            let lookup = self.fresh_temp(TypeName::class(METHOD_HANDLES_LOOKUP_CLASS));
            let lookup_call = MethodCall {
                kind: CallKind::Static,
                owner: TypeName::class(METHOD_HANDLES_CLASS),
                name: "lookup".to_string(),
                parameter_types: Vec::new(),
                return_type: lookup.ty.clone(),
                instance: None,
                args: Vec::new(),
                interface: false,
            };
            self.emit(
                node,
                Inst::assign(lookup.clone(), Expr::Call(Call::Method(lookup_call))),
            );
            let mut leading = vec![
                Value::Local(lookup),
                Value::Const(Constant::String(name.to_string())),
                Value::Const(Constant::Class(ty)),
            ];
            leading.append(&mut args);
            MethodCall {
                kind: CallKind::Static,
                owner: handle.owner,
                name: handle.name,
                parameter_types: handle.parameter_types,
                return_type: handle.return_type,
                instance: None,
                args: leading,
                interface: handle.interface,
            }
        };
        self.emit(
            node,
            Inst::assign(result.clone(), Expr::Call(Call::Method(call))),
        );
        Ok(result)
    }

    /// Bind `value` to `slot`, reusing the register already there when the
    /// types agree and nothing else reads it.
    pub(super) fn store(&mut self, node: usize, slot: u16, value: Value, frame: &mut Frame) -> BuildResult<()> {
        let value_ty = value.ty();
        let previous = frame.local(slot).cloned().filter(|old| {
            let old_ty = old.ty();
            value_ty.is_primitive() == old_ty.is_primitive()
                || old_ty.is_null()
                || self.is_parameter_slot(slot, node)
        });

        match previous {
            Some(Value::Local(old))
                if old.ty == value_ty || (value.is_null_constant() && !old.ty.is_primitive()) =>
            {
                let shared = frame.is_shared(&Value::Local(old.clone()), slot);
                if shared {
                    frame.put_local(slot, value);
                } else {
                    self.emit(node, Inst::assign(old, value));
                }
            }
            Some(Value::Local(_)) => {
                let register = self.declared_register(value_ty, slot, node);
                frame.put_local(slot, Value::Local(register.clone()));
                self.emit(node, Inst::assign(register, value));
            }
            // Parameters, `this` and constants are never written through.
            Some(_) => frame.put_local(slot, value),
            None => {
                let ty = if value_ty.is_null() {
                    self.covering_variable(slot, node)
                        .and_then(|variable| parse_field_descriptor(&variable.descriptor).ok())
                        .unwrap_or_else(TypeName::object)
                } else {
                    value_ty
                };
                let register = self.declared_register(ty, slot, node);
                frame.put_local(slot, Value::Local(register.clone()));
                self.emit(node, Inst::assign(register, value));
            }
        }
        Ok(())
    }
}

/// Pop `count` values, returned in push order.
fn pop_many(node: usize, count: usize, frame: &mut Frame) -> BuildResult<Vec<Value>> {
    let mut values = (0..count)
        .map(|_| frame.pop(node))
        .collect::<BuildResult<Vec<_>>>()?;
    values.reverse();
    Ok(values)
}

/// The `dup` family. Category-2 values count as two stack words.
fn duplicate(node: usize, op: DupOp, frame: &mut Frame) -> BuildResult<()> {
    let pushed = match op {
        DupOp::Dup => vec![frame.peek(node)?],
        DupOp::DupX1 => {
            let first = frame.pop(node)?;
            let second = frame.pop(node)?;
            vec![first.clone(), second, first]
        }
        DupOp::DupX2 => {
            let first = frame.pop(node)?;
            let second = frame.pop(node)?;
            if second.ty().is_dword() {
                vec![first.clone(), second, first]
            } else {
                let third = frame.pop(node)?;
                vec![first.clone(), third, second, first]
            }
        }
        DupOp::Dup2 => {
            let first = frame.pop(node)?;
            if first.ty().is_dword() {
                vec![first.clone(), first]
            } else {
                let second = frame.pop(node)?;
                vec![second.clone(), first.clone(), second, first]
            }
        }
        DupOp::Dup2X1 => {
            let first = frame.pop(node)?;
            let second = frame.pop(node)?;
            if first.ty().is_dword() {
                vec![first.clone(), second, first]
            } else {
                let third = frame.pop(node)?;
                vec![second.clone(), first.clone(), third, second, first]
            }
        }
        DupOp::Dup2X2 => {
            let first = frame.pop(node)?;
            let second = frame.pop(node)?;
            match (first.ty().is_dword(), second.ty().is_dword()) {
                (true, true) => vec![first.clone(), second, first],
                (true, false) => {
                    let third = frame.pop(node)?;
                    vec![first.clone(), third, second, first]
                }
                (false, _) => {
                    let third = frame.pop(node)?;
                    if third.ty().is_dword() {
                        vec![second.clone(), first.clone(), third, second, first]
                    } else {
                        let fourth = frame.pop(node)?;
                        vec![second.clone(), first.clone(), fourth, third, second, first]
                    }
                }
            }
        }
    };
    for value in pushed {
        frame.push(value);
    }
    Ok(())
}

fn literal_constant(literal: Literal) -> Constant {
    match literal {
        Literal::Null => Constant::Null,
        Literal::Int(value) => Constant::Int(value),
        Literal::Long(value) => Constant::Long(value),
        Literal::Float(value) => Constant::Float(value),
        Literal::Double(value) => Constant::Double(value),
    }
}

fn handle_ref(handle: &Handle) -> BuildResult<MethodHandleRef> {
    let owner = parse_internal_name(&handle.owner)?;
    let (parameter_types, return_type) = if handle.kind.is_field() {
        (Vec::new(), parse_field_descriptor(&handle.descriptor)?)
    } else {
        let method_type = parse_method_descriptor(&handle.descriptor)?;
        (method_type.parameters, method_type.return_type)
    };
    Ok(MethodHandleRef {
        kind: handle.kind,
        owner,
        name: handle.name.clone(),
        parameter_types,
        return_type,
        interface: handle.interface,
    })
}

fn malformed_bootstrap(name: &str, reason: String) -> BuildError {
    BuildError::MalformedBootstrap {
        name: name.to_string(),
        reason,
    }
}

/// Bootstrap methods must be method handles with a parseable descriptor.
fn bootstrap_handle(name: &str, handle: &Handle) -> BuildResult<MethodHandleRef> {
    if handle.kind.is_field() {
        return Err(malformed_bootstrap(
            name,
            format!("{:?} handle {}.{} is not a method", handle.kind, handle.owner, handle.name),
        ));
    }
    handle_ref(handle).map_err(|error| malformed_bootstrap(name, error.to_string()))
}

fn bootstrap_constant(name: &str, arg: &BootstrapArg) -> BuildResult<Constant> {
    let constant = match arg {
        BootstrapArg::Int(value) => Constant::Int(*value),
        BootstrapArg::Long(value) => Constant::Long(*value),
        BootstrapArg::Float(value) => Constant::Float(*value),
        BootstrapArg::Double(value) => Constant::Double(*value),
        BootstrapArg::String(value) => Constant::String(value.clone()),
        BootstrapArg::Class(class) => Constant::Class(parse_internal_name(class)?),
        BootstrapArg::MethodType(descriptor) => {
            let method_type = parse_method_descriptor(descriptor)
                .map_err(|error| malformed_bootstrap(name, error.to_string()))?;
            Constant::MethodType {
                parameters: method_type.parameters,
                return_type: method_type.return_type,
            }
        }
        BootstrapArg::Handle(handle) => Constant::MethodHandle(
            handle_ref(handle).map_err(|error| malformed_bootstrap(name, error.to_string()))?,
        ),
    };
    Ok(constant)
}

fn bootstrap_value(name: &str, arg: &BootstrapArg) -> BuildResult<BootstrapValue> {
    Ok(match bootstrap_constant(name, arg)? {
        Constant::Class(ty) => BootstrapValue::Type(ty),
        Constant::MethodType {
            parameters,
            return_type,
        } => BootstrapValue::MethodType {
            parameters,
            return_type,
        },
        Constant::MethodHandle(handle) => BootstrapValue::Handle(handle),
        other => BootstrapValue::Const(other),
    })
}
