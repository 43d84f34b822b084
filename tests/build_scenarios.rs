use jvmir::assembler::MethodAssembler;
use jvmir::ir::{Inst, InstList, LocalVar, Place, Value};
use jvmir::method::{BinaryOp, DupOp, FrameHint, FrameKind, Insn, JumpOp, Literal, VerifierType};
use jvmir::types::TypeName;
use jvmir::{BuildError, BuildOptions, MethodBody, build_method, build_methods};
use pretty_assertions::assert_eq;

fn assemble(asm: MethodAssembler) -> MethodBody {
    asm.finish().expect("assemble method body")
}

fn build(body: &MethodBody) -> InstList {
    build_method(body, BuildOptions::default()).expect("build IR")
}

fn listing(list: &InstList) -> Vec<String> {
    list.iter().map(ToString::to_string).collect()
}

/// Registers written or read as whole values, in order of appearance.
fn registers(list: &InstList) -> Vec<LocalVar> {
    let mut found = Vec::new();
    for inst in list {
        match inst {
            Inst::Assign {
                lhs: Place::Local(local),
                rhs,
            } => {
                found.push(local.clone());
                if let jvmir::ir::Expr::Value(Value::Local(source)) = rhs {
                    found.push(source.clone());
                }
            }
            Inst::Return(Some(Value::Local(local))) => found.push(local.clone()),
            _ => {}
        }
    }
    found
}

fn diverging_branch() -> MethodBody {
    let mut asm = MethodAssembler::new_static("demo/Pick", "pick", "(Z)Ljava/lang/Object;");
    asm.load(0)
        .jump(JumpOp::IfEq, "else")
        .iconst(1)
        .goto("join")
        .label("else")
        .insn(Insn::Const(Literal::Null))
        .label("join")
        .return_value();
    assemble(asm)
}

fn counting_loop() -> MethodBody {
    let mut asm = MethodAssembler::new_static("demo/Loop", "count", "()I");
    asm.iconst(0)
        .store(0)
        .label("head")
        .load(0)
        .iconst(10)
        .jump(JumpOp::IfICmpGe, "exit")
        .iinc(0, 1)
        .goto("head")
        .label("exit")
        .load(0)
        .return_value();
    assemble(asm)
}

#[test]
fn int_and_null_meet_in_object_register() {
    let list = build(&diverging_branch());
    assert_eq!(
        listing(&list),
        vec![
            "if (arg$0 == 0) goto #0 else #2",
            "#2:",
            "%0 = 1",
            "goto #1",
            "#0:",
            "%0 = null",
            "goto #1",
            "#1:",
            "return %0",
        ]
    );
    let Inst::Return(Some(value)) = &list[8] else {
        panic!("expected return, got {}", list[8]);
    };
    assert_eq!(value.ty(), TypeName::object());
}

#[test]
fn loop_header_merge_is_fed_from_both_edges() {
    let list = build(&counting_loop());
    assert_eq!(
        listing(&list),
        vec![
            "%0 = 0",
            "%1 = %0",
            "goto #0",
            "#0:",
            "if (%1 >= 10) goto #1 else #2",
            "#2:",
            "%2 = %1 + 1",
            "%1 = %2",
            "goto #0",
            "#1:",
            "return %1",
        ]
    );
}

#[test]
fn branch_reading_the_merge_register_reads_a_copy() {
    let mut asm = MethodAssembler::new_static("demo/Loop", "drain", "()I");
    asm.iconst(5)
        .store(0)
        .label("head")
        .load(0)
        .load(0)
        .iconst(-1)
        .insn(Insn::Binary(BinaryOp::Add))
        .store(0)
        .jump(JumpOp::IfNe, "head")
        .load(0)
        .return_value();
    let list = build(&assemble(asm));
    assert_eq!(
        listing(&list),
        vec![
            "%0 = 5",
            "%1 = %0",
            "goto #0",
            "#0:",
            "%2 = %1 + -1",
            "%3 = %1",
            "%1 = %2",
            "if (%3 != 0) goto #0 else #1",
            "#1:",
            "return %2",
        ]
    );
}

#[test]
fn handler_starts_with_catch_of_declared_type() {
    let mut asm = MethodAssembler::new_static("demo/Safe", "divide", "(I)I");
    asm.label("try_start")
        .iconst(100)
        .load(0)
        .insn(Insn::Binary(BinaryOp::Div))
        .label("try_end")
        .return_value()
        .label("handler")
        .store(1)
        .iconst(-1)
        .return_value()
        .try_catch("try_start", "try_end", "handler", Some("java/lang/ArithmeticException"));
    let list = build(&assemble(asm));
    assert_eq!(
        listing(&list),
        vec![
            "#0:",
            "%0 = 100 / arg$0",
            "#1:",
            "return %0",
            "#2:",
            "catch (java.lang.ArithmeticException %1)",
            "%2 = %1",
            "return -1",
        ]
    );
    let Inst::Catch {
        throwable, entries, ..
    } = &list[5]
    else {
        panic!("expected catch, got {}", list[5]);
    };
    assert_eq!(throwable.ty, TypeName::class("java/lang/ArithmeticException"));
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].start.0, "#0");
    assert_eq!(entries[0].end.0, "#1");
}

#[test]
fn catch_all_handlers_bind_throwable() {
    let mut asm = MethodAssembler::new_static("demo/Safe", "guard", "()V");
    asm.label("start")
        .invoke(jvmir::method::CallKind::Static, "demo/Safe", "work", "()V")
        .label("end")
        .ret()
        .label("handler")
        .throw()
        .try_catch("start", "end", "handler", None);
    let list = build(&assemble(asm));
    assert_eq!(
        listing(&list),
        vec![
            "#0:",
            "demo.Safe.work()",
            "#1:",
            "return",
            "#2:",
            "catch (java.lang.Throwable %0)",
            "throw %0",
        ]
    );
}

#[test]
fn lookup_switch_shares_labels_between_keys() {
    let mut asm = MethodAssembler::new_static("demo/Switch", "classify", "(I)I");
    asm.load(0)
        .lookup_switch("other", &[(1, "one"), (5, "many"), (9, "many")])
        .label("one")
        .iconst(1)
        .return_value()
        .label("many")
        .iconst(2)
        .return_value()
        .label("other")
        .iconst(0)
        .return_value();
    let list = build(&assemble(asm));
    assert_eq!(
        listing(&list),
        vec![
            "switch (arg$0) { 1 -> #0, 5 -> #1, 9 -> #1, default -> #2 }",
            "#0:",
            "return 1",
            "#1:",
            "return 2",
            "#2:",
            "return 0",
        ]
    );
    let labels = list
        .iter()
        .filter(|inst| matches!(inst, Inst::Label(_)))
        .count();
    assert_eq!(labels, 3);
}

#[test]
fn table_switch_keys_run_from_min() {
    let mut asm = MethodAssembler::new_static("demo/Switch", "day", "(I)I");
    asm.load(0)
        .table_switch(6, "weekday", &["weekend", "weekend"])
        .label("weekend")
        .iconst(1)
        .return_value()
        .label("weekday")
        .iconst(0)
        .return_value();
    let list = build(&assemble(asm));
    assert_eq!(
        listing(&list)[0],
        "switch (arg$0) { 6 -> #0, 7 -> #0, default -> #1 }"
    );
}

#[test]
fn unreachable_code_is_dropped() {
    let mut asm = MethodAssembler::new_static("demo/Dead", "early", "()I");
    asm.iconst(1)
        .return_value()
        .iconst(2)
        .store(0)
        .label("never")
        .load(0)
        .return_value();
    assert_eq!(listing(&build(&assemble(asm))), vec!["return 1"]);
}

#[test]
fn stack_shuffles() {
    let cases: Vec<(&str, Vec<Insn>, Vec<&str>)> = vec![
        (
            "(II)I",
            vec![Insn::Load(0), Insn::Load(1), Insn::Swap, Insn::Binary(BinaryOp::Sub)],
            vec!["%0 = arg$1 - arg$0", "return %0"],
        ),
        (
            "(III)I",
            vec![
                Insn::Load(0),
                Insn::Load(1),
                Insn::Load(2),
                Insn::Dup(DupOp::DupX2),
                Insn::Binary(BinaryOp::Add),
                Insn::Binary(BinaryOp::Add),
                Insn::Binary(BinaryOp::Add),
            ],
            vec![
                "%0 = arg$1 + arg$2",
                "%1 = arg$0 + %0",
                "%2 = arg$2 + %1",
                "return %2",
            ],
        ),
        (
            "(III)I",
            vec![
                Insn::Load(0),
                Insn::Load(1),
                Insn::Load(2),
                Insn::Dup(DupOp::Dup2X1),
                Insn::Binary(BinaryOp::Add),
                Insn::Binary(BinaryOp::Add),
                Insn::Binary(BinaryOp::Add),
                Insn::Binary(BinaryOp::Add),
            ],
            vec![
                "%0 = arg$1 + arg$2",
                "%1 = arg$0 + %0",
                "%2 = arg$2 + %1",
                "%3 = arg$1 + %2",
                "return %3",
            ],
        ),
        (
            "(JJ)J",
            vec![
                Insn::Load(0),
                Insn::Load(2),
                Insn::Dup(DupOp::Dup2X2),
                Insn::Binary(BinaryOp::Add),
                Insn::Binary(BinaryOp::Add),
            ],
            vec!["%0 = arg$0 + arg$1", "%1 = arg$1 + %0", "return %1"],
        ),
        (
            "(JI)I",
            vec![Insn::Load(0), Insn::Pop2, Insn::Load(2)],
            vec!["return arg$1"],
        ),
    ];

    for (descriptor, insns, expected) in cases {
        let mut asm = MethodAssembler::new_static("demo/Stack", "shuffle", descriptor);
        for insn in insns {
            asm.insn(insn);
        }
        asm.return_value();
        let list = build(&assemble(asm));
        assert_eq!(listing(&list), expected, "{descriptor}");
    }
}

#[test]
fn frame_hints_refine_merged_registers() {
    let mut asm = MethodAssembler::new_static(
        "demo/Text",
        "choose",
        "(ZLjava/lang/String;Ljava/lang/StringBuilder;)Ljava/lang/CharSequence;",
    );
    asm.load(0)
        .jump(JumpOp::IfEq, "else")
        .load(1)
        .store(3)
        .goto("join")
        .label("else")
        .load(2)
        .store(3)
        .label("join")
        .frame(FrameHint {
            kind: FrameKind::Full,
            locals: vec![
                VerifierType::Integer,
                VerifierType::Object("java/lang/String".into()),
                VerifierType::Object("java/lang/StringBuilder".into()),
                VerifierType::Object("java/lang/CharSequence".into()),
            ],
            stack: Vec::new(),
        })
        .load(3)
        .return_value();
    let body = assemble(asm);
    let list = build(&body);
    assert_eq!(
        listing(&list),
        vec![
            "if (arg$0 == 0) goto #0 else #2",
            "#2:",
            "%0 = arg$1",
            "%2 = %0",
            "goto #1",
            "#0:",
            "%1 = arg$2",
            "%2 = %1",
            "goto #1",
            "#1:",
            "return %2",
        ]
    );

    let char_sequence = TypeName::class("java/lang/CharSequence");
    let merged: Vec<LocalVar> = registers(&list)
        .into_iter()
        .filter(|local| local.index == 2)
        .collect();
    assert_eq!(merged.len(), 3);
    assert!(merged.iter().all(|local| local.ty == char_sequence));

    // Building again sees the same refined registers.
    assert_eq!(build(&body), list);
}

#[test]
fn merge_registers_are_assigned_on_every_incoming_path() {
    for body in [diverging_branch(), counting_loop()] {
        let list = build(&body);
        for (index, inst) in list.iter().enumerate() {
            let Inst::Goto(target) = inst else {
                continue;
            };
            let join = list.label_index(target).expect("goto target is placed");
            // every register read right after a join was written before each goto into it
            let Some(Inst::Return(Some(Value::Local(read)))) = list.instructions()[join..]
                .iter()
                .find(|inst| matches!(inst, Inst::Return(_)))
            else {
                continue;
            };
            let written = list.instructions()[..index]
                .iter()
                .rev()
                .take_while(|inst| !matches!(inst, Inst::Label(_)))
                .any(|inst| inst.assigns_to(read))
                || index + 1 == join;
            assert!(written, "{read} not assigned before goto at {index} in\n{list}");
        }
    }
}

#[test]
fn builds_are_deterministic_and_isolated() {
    let mut broken = MethodAssembler::new_static("demo/Broken", "pop", "()V");
    broken.insn(Insn::Pop).ret();
    let bodies = vec![diverging_branch(), assemble(broken), counting_loop()];

    let first = build_methods(&bodies, BuildOptions::default());
    let second = build_methods(&bodies, BuildOptions::default());
    assert_eq!(first.len(), 3);
    assert!(first[1].is_err());
    assert_eq!(
        first[1].as_ref().err().and_then(|error| error.downcast_ref::<BuildError>()),
        Some(&BuildError::StackUnderflow { node: 1 })
    );

    for (left, right) in first.iter().zip(&second) {
        if let (Ok(left), Ok(right)) = (left, right) {
            assert_eq!(
                serde_json::to_string(left).expect("serialize"),
                serde_json::to_string(right).expect("serialize")
            );
        }
    }
    assert_eq!(first[2].as_ref().ok(), Some(&build(&counting_loop())));
}

#[test]
fn bodies_survive_a_json_exchange() {
    let body = counting_loop();
    let json = serde_json::to_string(&body).expect("serialize body");
    let restored = MethodBody::from_json(&json).expect("parse body");
    assert_eq!(build(&restored), build(&body));
}

#[test]
fn debug_names_are_kept_on_request() {
    let mut asm = MethodAssembler::new_static("demo/Names", "total", "(I)I");
    asm.label("start")
        .load(0)
        .iconst(2)
        .insn(Insn::Binary(BinaryOp::Mul))
        .store(1)
        .label("scope")
        .load(1)
        .return_value()
        .label("end")
        .local_variable("count", "I", 0, "start", "end")
        .local_variable("doubled", "I", 1, "scope", "end");
    let body = assemble(asm);

    let named = build_method(
        &body,
        BuildOptions {
            keep_local_variable_names: true,
        },
    )
    .expect("build IR");
    assert_eq!(
        listing(&named),
        vec!["#0:", "%0 = count * 2", "doubled = %0", "#1:", "return doubled"]
    );

    let anonymous = build(&body);
    assert_eq!(
        listing(&anonymous),
        vec!["#0:", "%0 = count * 2", "%1 = %0", "#1:", "return %1"]
    );
}

#[test]
fn line_numbers_follow_their_labels() {
    let mut asm = MethodAssembler::new_static("demo/Lines", "one", "()I");
    asm.label("l0").line(7, "l0").iconst(1).return_value();
    assert_eq!(
        listing(&build(&assemble(asm))),
        vec!["#0:", "line 7 at #0", "return 1"]
    );
}

#[test]
fn hinted_loop_header_is_not_fed_from_itself() {
    let mut asm = MethodAssembler::new_static(
        "demo/Text",
        "drain",
        "(ZLjava/lang/String;Ljava/lang/StringBuilder;)V",
    );
    asm.load(0)
        .jump(JumpOp::IfEq, "else")
        .load(1)
        .store(3)
        .goto("head")
        .label("else")
        .load(2)
        .store(3)
        .label("head")
        .frame(FrameHint {
            kind: FrameKind::Full,
            locals: vec![
                VerifierType::Integer,
                VerifierType::Object("java/lang/String".into()),
                VerifierType::Object("java/lang/StringBuilder".into()),
                VerifierType::Object("java/lang/CharSequence".into()),
            ],
            stack: Vec::new(),
        })
        .load(3)
        .invoke(
            jvmir::method::CallKind::Static,
            "demo/Text",
            "consume",
            "(Ljava/lang/CharSequence;)I",
        )
        .jump(JumpOp::IfNe, "head")
        .ret();
    let list = build(&assemble(asm));
    assert_eq!(
        listing(&list),
        vec![
            "if (arg$0 == 0) goto #0 else #2",
            "#2:",
            "%0 = arg$1",
            "%2 = %0",
            "goto #1",
            "#0:",
            "%1 = arg$2",
            "%2 = %1",
            "goto #1",
            "#1:",
            "%3 = demo.Text.consume(%2)",
            "if (%3 != 0) goto #1 else #3",
            "#3:",
            "return",
        ]
    );
    let self_assigned = list.iter().any(|inst| {
        matches!(
            inst,
            Inst::Assign {
                lhs: Place::Local(target),
                rhs: jvmir::ir::Expr::Value(Value::Local(source)),
            } if target.index == source.index
        )
    });
    assert!(!self_assigned, "self assignment in\n{list}");
}

#[test]
fn handler_join_is_fed_where_each_value_enters() {
    let mut asm = MethodAssembler::new_static(
        "demo/Retry",
        "pick",
        "(Ljava/lang/String;Ljava/lang/Object;)Ljava/lang/Object;",
    );
    asm.load(0)
        .store(2)
        .label("start")
        .load(1)
        .store(2)
        .label("end")
        .load(2)
        .return_value()
        .label("handler")
        .insn(Insn::Pop)
        .load(2)
        .return_value()
        .try_catch("start", "end", "handler", None);
    let list = build(&assemble(asm));
    assert_eq!(
        listing(&list),
        vec![
            "%0 = arg$0",
            "%3 = %0",
            "#0:",
            "%1 = arg$1",
            "%3 = %1",
            "#1:",
            "return %1",
            "#2:",
            "catch (java.lang.Throwable %2)",
            "return %3",
        ]
    );
    assert!(!list.iter().any(|inst| matches!(inst, Inst::Goto(_))));
    let Inst::Return(Some(value)) = &list[9] else {
        panic!("expected return, got {}", list[9]);
    };
    assert_eq!(value.ty(), TypeName::object());
}

#[test]
fn conditional_operand_meets_on_the_stack() {
    let mut asm = MethodAssembler::new_static("demo/Pick", "either", "(ZII)I");
    asm.load(0)
        .jump(JumpOp::IfEq, "else")
        .load(1)
        .goto("join")
        .label("else")
        .load(2)
        .label("join")
        .return_value();
    let list = build(&assemble(asm));
    assert_eq!(
        listing(&list),
        vec![
            "if (arg$0 == 0) goto #0 else #2",
            "#2:",
            "%0 = arg$1",
            "goto #1",
            "#0:",
            "%0 = arg$2",
            "goto #1",
            "#1:",
            "return %0",
        ]
    );
    let Inst::Return(Some(value)) = &list[8] else {
        panic!("expected return, got {}", list[8]);
    };
    assert_eq!(value.ty(), TypeName::INT);
}
