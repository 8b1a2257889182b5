// Generic worklist dataflow driver (spec.md §4.2).
//
// Parameterized over a lattice element `T` and a visitor capability set
// (visitFAdd/FSub/FMul/FDiv/Phi, getUnbounded). FIA and PEA are its two
// concrete visitors. Termination rests on per-value trip-count caps, not
// monotonicity (spec.md §9 "Non-monotone lattice") — loops with an unknown
// trip count are abandoned to `unbounded()` permanently.

use crate::error::AnalysisError;
use crate::ir::{BlockId, Function, Instr, ValueId};
use std::collections::{HashMap, HashSet, VecDeque};

/// Read-only view a visitor gets of the function and the dataflow state
/// computed so far (seeded entries plus anything a prior pop has produced).
pub struct Ctx<'a, T> {
    pub function: &'a Function,
    pub result: &'a HashMap<ValueId, T>,
}

impl<'a, T: Clone> Ctx<'a, T> {
    pub fn get(&self, v: ValueId) -> Option<T> {
        self.result.get(&v).cloned()
    }
}

pub trait Visitor<T: Clone> {
    fn visit_fadd(&self, ctx: &Ctx<T>, id: ValueId, lhs: ValueId, rhs: ValueId) -> Result<T, AnalysisError>;
    fn visit_fsub(&self, ctx: &Ctx<T>, id: ValueId, lhs: ValueId, rhs: ValueId) -> Result<T, AnalysisError>;
    fn visit_fmul(&self, ctx: &Ctx<T>, id: ValueId, lhs: ValueId, rhs: ValueId) -> Result<T, AnalysisError>;
    fn visit_fdiv(&self, ctx: &Ctx<T>, id: ValueId, lhs: ValueId, rhs: ValueId) -> Result<T, AnalysisError>;
    fn visit_phi(
        &self,
        ctx: &Ctx<T>,
        id: ValueId,
        incoming: &[(ValueId, BlockId)],
    ) -> Result<T, AnalysisError>;
    fn unbounded(&self) -> T;
}

fn is_supported(instr: &Instr) -> bool {
    matches!(
        instr,
        Instr::FAdd(..) | Instr::FSub(..) | Instr::FMul(..) | Instr::FDiv(..) | Instr::Phi(..)
    )
}

/// Runs the visitor to a fixpoint over `f`, starting from `initial` (e.g.
/// FIA's range-annotation seeds). Returns the final per-value map.
pub fn run<T: Clone>(
    f: &Function,
    visitor: &dyn Visitor<T>,
    initial: HashMap<ValueId, T>,
) -> Result<HashMap<ValueId, T>, AnalysisError> {
    let mut worklist: VecDeque<ValueId> = VecDeque::new();
    let mut queued: HashSet<ValueId> = HashSet::new();
    let mut iteration_count: HashMap<ValueId, u32> = HashMap::new();
    let mut result: HashMap<ValueId, T> = initial;
    let mut stabilized: HashSet<ValueId> = HashSet::new();

    for v in f.program_order() {
        worklist.push_back(v);
        queued.insert(v);
    }

    while let Some(v) = worklist.pop_front() {
        queued.remove(&v);

        if stabilized.contains(&v) {
            continue;
        }

        let instr = f.instr(v);
        if !is_supported(instr) {
            continue;
        }

        if let Some(header) = f.loop_header_of(v) {
            let info = f.loops.get(&header).expect("loop membership without LoopInfo");
            match info.trip_count {
                Some(tc) => {
                    if *iteration_count.get(&v).unwrap_or(&0) as u64 >= tc {
                        continue;
                    }
                }
                None => {
                    result.insert(v, visitor.unbounded());
                    stabilized.insert(v);
                    continue;
                }
            }
        }

        let ctx = Ctx { function: f, result: &result };
        let t = match instr {
            Instr::FAdd(l, r) => visitor.visit_fadd(&ctx, v, *l, *r)?,
            Instr::FSub(l, r) => visitor.visit_fsub(&ctx, v, *l, *r)?,
            Instr::FMul(l, r) => visitor.visit_fmul(&ctx, v, *l, *r)?,
            Instr::FDiv(l, r) => visitor.visit_fdiv(&ctx, v, *l, *r)?,
            Instr::Phi(incoming) => visitor.visit_phi(&ctx, v, incoming)?,
            _ => unreachable!("is_supported filtered this opcode"),
        };

        for user in f.uses(v)? {
            if queued.insert(user) {
                worklist.push_back(user);
            }
        }

        *iteration_count.entry(v).or_insert(0) += 1;
        result.insert(v, t);
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{FunctionBuilder, Instr};

    struct SumVisitor;
    impl Visitor<f64> for SumVisitor {
        fn visit_fadd(&self, ctx: &Ctx<f64>, _id: ValueId, lhs: ValueId, rhs: ValueId) -> Result<f64, AnalysisError> {
            Ok(ctx.get(lhs).unwrap_or(0.0) + ctx.get(rhs).unwrap_or(0.0))
        }
        fn visit_fsub(&self, ctx: &Ctx<f64>, _id: ValueId, lhs: ValueId, rhs: ValueId) -> Result<f64, AnalysisError> {
            Ok(ctx.get(lhs).unwrap_or(0.0) - ctx.get(rhs).unwrap_or(0.0))
        }
        fn visit_fmul(&self, ctx: &Ctx<f64>, _id: ValueId, lhs: ValueId, rhs: ValueId) -> Result<f64, AnalysisError> {
            Ok(ctx.get(lhs).unwrap_or(0.0) * ctx.get(rhs).unwrap_or(0.0))
        }
        fn visit_fdiv(&self, ctx: &Ctx<f64>, _id: ValueId, lhs: ValueId, rhs: ValueId) -> Result<f64, AnalysisError> {
            Ok(ctx.get(lhs).unwrap_or(0.0) / ctx.get(rhs).unwrap_or(1.0))
        }
        fn visit_phi(&self, ctx: &Ctx<f64>, _id: ValueId, incoming: &[(ValueId, BlockId)]) -> Result<f64, AnalysisError> {
            Ok(incoming.iter().map(|(v, _)| ctx.get(*v).unwrap_or(0.0)).fold(f64::MIN, f64::max))
        }
        fn unbounded(&self) -> f64 {
            f64::INFINITY
        }
    }

    #[test]
    fn straight_line_propagates() {
        let mut b = FunctionBuilder::new("f");
        let entry = b.add_block();
        b.set_entry(entry);
        let c0 = b.emit(entry, Instr::ConstF(3.0));
        let c1 = b.emit(entry, Instr::ConstF(4.0));
        let add = b.emit(entry, Instr::FAdd(c0, c1));
        let f = b.finish();

        let mut initial = HashMap::new();
        initial.insert(c0, 3.0);
        initial.insert(c1, 4.0);
        let result = run(&f, &SumVisitor, initial).unwrap();
        assert_eq!(result[&add], 7.0);
    }

    #[test]
    fn unknown_trip_count_forces_unbounded() {
        let mut b = FunctionBuilder::new("f");
        let entry = b.add_block();
        let header = b.add_block();
        b.set_entry(entry);
        b.connect(entry, header);
        b.connect(header, header);
        let c0 = b.emit(entry, Instr::ConstF(1.0));
        let phi = b.emit(header, Instr::Phi(vec![(c0, entry)]));
        let inc = b.emit(header, Instr::FAdd(phi, c0));
        b.mark_loop(header, &[header], None);
        let f = b.finish();

        let mut initial = HashMap::new();
        initial.insert(c0, 1.0);
        let result = run(&f, &SumVisitor, initial).unwrap();
        assert!(result[&phi].is_infinite());
        let _ = inc;
    }
}
