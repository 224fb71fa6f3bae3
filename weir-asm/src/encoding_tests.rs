use crate::*;
use rstest::rstest;
use strum::IntoEnumIterator;

#[test]
fn opcode_u8_round_trip() {
    for op in Opcode::iter() {
        let b = op as u8;
        assert_eq!(Opcode::try_from(b), Ok(op));
    }

    for b in (Opcode::SPLITV as u8 + 1)..=u8::MAX {
        assert_eq!(Opcode::try_from(b), Err(InvalidOpcode));
    }
}

#[test]
fn branch_cond_negation_is_involutive() {
    for cond in BranchCond::iter() {
        assert_eq!(cond.negate().negate(), cond);
    }
}

#[test]
fn branch_cond_negation_flips_satisfaction() {
    for cond in BranchCond::iter() {
        for flag in [-1i8, 0, 1] {
            assert_ne!(cond.satisfied(flag), cond.negate().satisfied(flag));
        }
    }
}

#[rstest]
#[case(Operand::None)]
#[case(Operand::Reg(Reg::TT))]
#[case(Operand::Reg(Reg::TNum))]
#[case(Operand::Reg(Reg::TLen))]
#[case(Operand::Reg(Reg::M))]
#[case(Operand::Slot(0))]
#[case(Operand::Slot(7))]
#[case(Operand::Slot(2047))]
#[case(Operand::Lit(0))]
#[case(Operand::Lit(1))]
#[case(Operand::Lit(-1))]
#[case(Operand::Lit(LIT_MIN as i16))]
#[case(Operand::Lit(LIT_MAX as i16))]
fn operand_round_trip(#[case] a: Operand) {
    for b in [Operand::None, Operand::Slot(3), Operand::Lit(-5)] {
        let instr = Instruction::op(Opcode::ICMP, a, b);
        assert_eq!(instr.opcode(), Ok(Opcode::ICMP));
        assert_eq!(instr.a(), Some(a));
        assert_eq!(instr.b(), Some(b));

        // the raw word survives a byte round trip
        let raw = u32::from_be_bytes(instr.to_bytes());
        assert_eq!(Instruction::from(raw), instr);
    }
}

#[rstest]
#[case(BranchCond::Always, 0)]
#[case(BranchCond::Eq, 1)]
#[case(BranchCond::Ne, -1)]
#[case(BranchCond::Lt, 1000)]
#[case(BranchCond::Ge, -1000)]
#[case(BranchCond::Gt, BR_DISP_MAX as i32)]
#[case(BranchCond::Le, BR_DISP_MIN as i32)]
fn branch_round_trip(#[case] cond: BranchCond, #[case] disp: i32) {
    for op in [Opcode::JMP, Opcode::CALL] {
        let instr = Instruction::branch(op, cond, disp);
        assert_eq!(instr.opcode(), Ok(op));
        assert_eq!(instr.cond(), cond);
        assert_eq!(instr.disp(), disp);
    }
}

#[test]
fn token_kind_slots_are_stable() {
    for (slot, kind) in TokenKind::SWITCH.iter().enumerate() {
        assert_eq!(*kind as usize, slot);
        assert_eq!(TokenKind::try_from(slot as u8), Ok(*kind));
    }
}

#[test]
fn program_split_table_slicing() {
    // two splits: {10, 20} and {30}
    let sdata = vec![0, 2, 3, 10, 20, 30];
    let prog = Program::from_parts(vec![], vec![], vec![], 2, sdata, vec![]);

    assert_eq!(prog.split_entries(0), Some(&[10, 20][..]));
    assert_eq!(prog.split_entries(1), Some(&[30][..]));
    assert_eq!(prog.split_entries(2), None);
}
