//! End-to-end tests driving the full allocation pipeline.

use alloc::vec::Vec;

use smallvec::smallvec;

use crate::lir::{
    Block, BlockFlags, Cond, DebugInfo, Lir, Op, Operand, OperandRole, PhysReg, ValueKind, VirtReg,
};
use crate::target::TargetDesc;
use crate::{AllocError, LinearScan, Options};

fn target(num_regs: usize) -> TargetDesc {
    TargetDesc::new(
        num_regs as u32,
        (0..num_regs).map(PhysReg::new).collect::<Vec<_>>(),
        alloc::vec![],
        core::iter::empty(),
    )
}

fn target_all_caller_saved(num_regs: usize) -> TargetDesc {
    TargetDesc::new(
        num_regs as u32,
        (0..num_regs).map(PhysReg::new).collect::<Vec<_>>(),
        alloc::vec![],
        (0..num_regs).map(PhysReg::new),
    )
}

fn def(lir: &mut Lir, block: Block, vreg: VirtReg) {
    lir.push_inst(
        block,
        Op::Compute {
            inputs: smallvec![],
            temps: smallvec![],
            outputs: smallvec![Operand::Virt(vreg)],
        },
    );
}

fn read(lir: &mut Lir, block: Block, vreg: VirtReg) {
    lir.push_inst(
        block,
        Op::Compute {
            inputs: smallvec![Operand::Virt(vreg)],
            temps: smallvec![],
            outputs: smallvec![],
        },
    );
}

fn jump(lir: &mut Lir, from: Block, to: Block) {
    lir.push_inst(from, Op::Jump { target: to });
    lir.add_edge(from, to);
}

/// After allocation every operand must be a register, stack slot or
/// constant.
fn assert_all_physical(lir: &Lir) {
    for &block in lir.block_order() {
        for &inst in &lir.block(block).insts {
            for role in [OperandRole::Input, OperandRole::Temp, OperandRole::Output] {
                lir.inst(inst).for_each_operand(role, |operand| {
                    assert!(
                        operand.as_virt().is_none(),
                        "operand {operand} of {inst} was not allocated"
                    );
                });
            }
        }
    }
}

#[test]
fn straight_line_code_stays_in_registers() {
    let mut lir = Lir::new();
    let entry = lir.create_block();
    let v0 = lir.new_vreg(ValueKind::Int);
    let v1 = lir.new_vreg(ValueKind::Int);
    def(&mut lir, entry, v0);
    def(&mut lir, entry, v1);
    read(&mut lir, entry, v0);
    lir.push_inst(
        entry,
        Op::Return {
            value: Some(Operand::Virt(v1)),
        },
    );
    lir.set_block_order(alloc::vec![entry]);

    let mut scan = LinearScan::new();
    let output = scan
        .allocate(&mut lir, &target(4), &Options::default())
        .unwrap();

    assert_all_physical(&lir);
    assert_eq!(output.num_spill_slots, 0);
    assert_eq!(scan.stats().spilled_intervals, 0);
}

#[test]
fn values_flow_through_a_diamond() {
    let mut lir = Lir::new();
    let entry = lir.create_block();
    let left = lir.create_block();
    let right = lir.create_block();
    let join = lir.create_block();
    let v0 = lir.new_vreg(ValueKind::Int);
    let v1 = lir.new_vreg(ValueKind::Int);
    let v2 = lir.new_vreg(ValueKind::Int);

    def(&mut lir, entry, v0);
    lir.push_inst(
        entry,
        Op::Branch {
            cond: Cond::Lt,
            target: left,
        },
    );
    lir.add_edge(entry, left);
    jump(&mut lir, entry, right);

    def(&mut lir, left, v1);
    read(&mut lir, left, v1);
    jump(&mut lir, left, join);

    def(&mut lir, right, v2);
    read(&mut lir, right, v2);
    jump(&mut lir, right, join);

    read(&mut lir, join, v0);
    lir.push_inst(join, Op::Return { value: None });
    lir.set_block_order(alloc::vec![entry, left, right, join]);

    let mut scan = LinearScan::new();
    scan.allocate(&mut lir, &target(4), &Options::default())
        .unwrap();
    assert_all_physical(&lir);
}

#[test]
fn register_pressure_forces_a_spill() {
    // Three values overlap on a two register target.
    let mut lir = Lir::new();
    let entry = lir.create_block();
    let vregs: Vec<VirtReg> = (0..3).map(|_| lir.new_vreg(ValueKind::Int)).collect();
    for &vreg in &vregs {
        def(&mut lir, entry, vreg);
    }
    for &vreg in &vregs {
        read(&mut lir, entry, vreg);
    }
    lir.push_inst(entry, Op::Return { value: None });
    lir.set_block_order(alloc::vec![entry]);

    let mut scan = LinearScan::new();
    let output = scan
        .allocate(&mut lir, &target(2), &Options::default())
        .unwrap();

    assert_all_physical(&lir);
    assert!(output.num_spill_slots >= 1);
    assert!(scan.stats().spilled_intervals >= 1);
}

#[test]
fn value_survives_a_call() {
    // Every register is clobbered by the call, so the value must cross it
    // in memory.
    let mut lir = Lir::new();
    let entry = lir.create_block();
    let v0 = lir.new_vreg(ValueKind::Int);
    def(&mut lir, entry, v0);
    lir.push_inst(
        entry,
        Op::Call {
            args: smallvec![],
            result: None,
        },
    );
    read(&mut lir, entry, v0);
    lir.push_inst(entry, Op::Return { value: None });
    lir.set_block_order(alloc::vec![entry]);

    let mut scan = LinearScan::new();
    let output = scan
        .allocate(&mut lir, &target_all_caller_saved(2), &Options::default())
        .unwrap();

    assert_all_physical(&lir);
    assert!(output.num_spill_slots >= 1);
}

#[test]
fn oop_map_records_a_live_reference() {
    let mut lir = Lir::new();
    let entry = lir.create_block();
    let v0 = lir.new_vreg(ValueKind::Object);
    def(&mut lir, entry, v0);
    let call = lir.push_inst_with_info(
        entry,
        Op::Call {
            args: smallvec![],
            result: None,
        },
        DebugInfo {
            live_values: smallvec![v0],
            oop_map: smallvec![],
        },
    );
    read(&mut lir, entry, v0);
    lir.push_inst(entry, Op::Return { value: None });
    lir.set_block_order(alloc::vec![entry]);

    let mut scan = LinearScan::new();
    scan.allocate(&mut lir, &target(2), &Options::default())
        .unwrap();

    let info = lir.inst(call).info.as_ref().unwrap();
    assert_eq!(info.oop_map.len(), 1);
}

#[test]
fn use_before_any_definition_is_an_error() {
    let mut lir = Lir::new();
    let entry = lir.create_block();
    let v0 = lir.new_vreg(ValueKind::Int);
    read(&mut lir, entry, v0);
    lir.push_inst(entry, Op::Return { value: None });
    lir.set_block_order(alloc::vec![entry]);

    let mut scan = LinearScan::new();
    let err = scan
        .allocate(&mut lir, &target(2), &Options::default())
        .unwrap_err();
    assert!(matches!(err, AllocError::LiveIntoEntry(vreg) if vreg == v0));
}

#[test]
fn dead_definition_still_gets_a_register() {
    let mut lir = Lir::new();
    let entry = lir.create_block();
    let v0 = lir.new_vreg(ValueKind::Int);
    def(&mut lir, entry, v0);
    lir.push_inst(entry, Op::Return { value: None });
    lir.set_block_order(alloc::vec![entry]);

    let mut scan = LinearScan::new();
    scan.allocate(&mut lir, &target(2), &Options::default())
        .unwrap();

    assert_all_physical(&lir);
    assert_eq!(scan.stats().dead_defs, 1);
}

#[test]
fn short_loops_are_rotated_by_the_cleanup() {
    let mut lir = Lir::new();
    let entry = lir.create_block();
    let header = lir.create_block();
    let body_a = lir.create_block();
    let body_b = lir.create_block();
    let exit = lir.create_block();
    let v0 = lir.new_vreg(ValueKind::Int);
    let v1 = lir.new_vreg(ValueKind::Int);

    jump(&mut lir, entry, header);
    lir.push_inst(
        header,
        Op::Branch {
            cond: Cond::Eq,
            target: exit,
        },
    );
    lir.add_edge(header, exit);
    jump(&mut lir, header, body_a);
    def(&mut lir, body_a, v0);
    jump(&mut lir, body_a, body_b);
    def(&mut lir, body_b, v1);
    jump(&mut lir, body_b, header);
    lir.push_inst(exit, Op::Return { value: None });

    for block in [header, body_a, body_b] {
        lir.set_loop(block, 0, 1);
    }
    lir.block_mut(header).flags |= BlockFlags::LOOP_HEADER | BlockFlags::BACKWARD_BRANCH_TARGET;
    lir.block_mut(body_b).flags |= BlockFlags::LOOP_END;
    lir.set_block_order(alloc::vec![entry, header, body_a, body_b, exit]);

    let mut scan = LinearScan::new();
    scan.allocate(&mut lir, &target(2), &Options::default())
        .unwrap();

    assert_eq!(lir.block_order(), &[entry, body_a, body_b, header, exit]);
    assert!(
        lir.block(body_a)
            .flags
            .contains(BlockFlags::BACKWARD_BRANCH_TARGET)
    );
    assert_eq!(scan.stats().short_loops_rotated, 1);
}

#[test]
fn allocator_state_is_reusable_across_functions() {
    let mut scan = LinearScan::new();

    for num_values in [2usize, 5] {
        let mut lir = Lir::new();
        let entry = lir.create_block();
        let vregs: Vec<VirtReg> = (0..num_values)
            .map(|_| lir.new_vreg(ValueKind::Int))
            .collect();
        for &vreg in &vregs {
            def(&mut lir, entry, vreg);
        }
        for &vreg in &vregs {
            read(&mut lir, entry, vreg);
        }
        lir.push_inst(entry, Op::Return { value: None });
        lir.set_block_order(alloc::vec![entry]);

        scan.allocate(&mut lir, &target(3), &Options::default())
            .unwrap();
        assert_all_physical(&lir);
    }
}
