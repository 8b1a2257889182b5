// Float Interval Analysis (spec.md §4.3).
//
// Seeds ranges from `llvm.float.range` annotations, runs the worklist
// driver (dataflow module) with `Range` as the lattice element, and refines
// operand lookups with branch control-dependencies at each query site.

use crate::dataflow::{self, Ctx, Visitor};
use crate::error::AnalysisError;
use crate::ir::{BlockId, FPred, Function, Instr, PredKind, ValueId};
use crate::range::Range;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};

/// `(cmp, trueBlock?, falseBlock?)` attached to both operands of an `FCmp`
/// used as a branch condition. A block field is `None` unless that
/// successor has a single predecessor — the condition that guarantees every
/// use inside it is dominated by this specific branch outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct CtrlDep {
    pub cmp: ValueId,
    pub true_path: Option<BlockId>,
    pub false_path: Option<BlockId>,
}

/// `ValueId -> Range`; missing keys read as `Top` (spec.md §3).
#[derive(Debug, Clone, Default)]
pub struct RangeStore(HashMap<ValueId, Range>);

impl RangeStore {
    pub fn get(&self, v: ValueId) -> Range {
        self.0.get(&v).copied().unwrap_or(Range::Top)
    }
}

pub struct FiaResult {
    pub store: RangeStore,
    pub ctrl_deps: HashMap<ValueId, Vec<CtrlDep>>,
    pub min_integer_bits: Option<u64>,
}

impl FiaResult {
    /// Query entrypoint: applies control-dependency refinement to the
    /// stored range of `operand` as seen from `context` (spec.md §4.3
    /// "Operand range lookup").
    pub fn range_of(&self, f: &Function, operand: ValueId, context: BlockId) -> Range {
        range_with_refinement(f, &self.store, &self.ctrl_deps, operand, context)
    }
}

pub fn analyze(f: &Function) -> Result<FiaResult, AnalysisError> {
    let ctrl_deps = collect_ctrl_deps(f);
    let seeds = seed_store(f);
    let visitor = FiaVisitor { f, ctrl_deps: &ctrl_deps, visited_phis: RefCell::new(HashSet::new()) };
    let computed = dataflow::run(f, &visitor, seeds)?;
    let store = RangeStore(computed);
    let min_integer_bits = compute_min_integer_bits(f, &store, &ctrl_deps);
    Ok(FiaResult { store, ctrl_deps, min_integer_bits })
}

fn collect_ctrl_deps(f: &Function) -> HashMap<ValueId, Vec<CtrlDep>> {
    let mut map: HashMap<ValueId, Vec<CtrlDep>> = HashMap::new();
    for v in f.program_order() {
        let (cond, then_bb, else_bb) = match f.instr(v) {
            Instr::Br { cond, then_bb, else_bb } => (*cond, *then_bb, *else_bb),
            _ => continue,
        };
        let (op0, op1) = match f.instr(cond) {
            Instr::FCmp(_, a, b) => (*a, *b),
            _ => continue,
        };
        let true_path = if f.block(then_bb).preds.len() == 1 { Some(then_bb) } else { None };
        let false_path = if f.block(else_bb).preds.len() == 1 { Some(else_bb) } else { None };
        if true_path == false_path {
            // both None (or, degenerately, the same single-pred block for
            // both arms) — nothing to refine with.
            continue;
        }
        let dep = CtrlDep { cmp: cond, true_path, false_path };
        map.entry(op0).or_default().push(dep.clone());
        map.entry(op1).or_default().push(dep);
    }
    map
}

fn seed_store(f: &Function) -> HashMap<ValueId, Range> {
    let mut seeds = HashMap::new();
    for v in f.program_order() {
        if let Instr::RangeAnnotation { value, lo, hi } = f.instr(v) {
            seeds.insert(*value, Range::new(*lo as f64, *hi as f64));
        }
    }
    seeds
}

fn mirror(k: PredKind) -> PredKind {
    match k {
        PredKind::Gt => PredKind::Lt,
        PredKind::Lt => PredKind::Gt,
        PredKind::Ge => PredKind::Le,
        PredKind::Le => PredKind::Ge,
        PredKind::Eq => PredKind::Eq,
        PredKind::Ne => PredKind::Ne,
    }
}

/// spec.md §4.3 "Constraint application". Only refines when both `r` and
/// the other operand's range `o` are valid finite intervals — this is also
/// what gives the open-question short-circuit "do nothing when the other
/// operand's range is Top" for free, along with the symmetric case of `r`
/// itself being Top or Bottom.
fn constrain(r: Range, o: Range, kind: PredKind) -> Range {
    let (rmin, rmax) = match r {
        Range::Interval { min, max } => (min, max),
        _ => return r,
    };
    let (omin, omax) = match o {
        Range::Interval { min, max } => (min, max),
        _ => return r,
    };
    match kind {
        PredKind::Gt | PredKind::Ge => Range::new(rmin.max(omin), rmax),
        PredKind::Lt | PredKind::Le => Range::new(rmin, rmax.min(omax)),
        PredKind::Eq | PredKind::Ne => r,
    }
}

/// Shared refinement core used both mid-dataflow (looking up the partial
/// `result` map) and post-hoc (looking up the finalized `RangeStore`).
fn refine_with(
    f: &Function,
    ctrl_deps: &HashMap<ValueId, Vec<CtrlDep>>,
    lookup: &dyn Fn(ValueId) -> Range,
    operand: ValueId,
    context: BlockId,
) -> Range {
    if let Instr::ConstF(c) = f.instr(operand) {
        return Range::point(*c);
    }
    let mut r = lookup(operand);
    if let Some(deps) = ctrl_deps.get(&operand) {
        for dep in deps {
            let (pred, op0, op1) = match f.instr(dep.cmp) {
                Instr::FCmp(p, a, b) => (*p, *a, *b),
                _ => continue,
            };
            let operand_is_left = operand == op0;
            let other = if operand_is_left { op1 } else { op0 };
            let other_range = lookup(other);

            if let Some(tp) = dep.true_path {
                if context == tp || f.doms.dominates(tp, context) {
                    let mut kind = pred.kind();
                    if !operand_is_left {
                        kind = mirror(kind);
                    }
                    r = constrain(r, other_range, kind);
                }
            }
            if let Some(fp) = dep.false_path {
                if context == fp || f.doms.dominates(fp, context) {
                    let mut kind = pred.invert().kind();
                    if !operand_is_left {
                        kind = mirror(kind);
                    }
                    r = constrain(r, other_range, kind);
                }
            }
        }
    }
    r
}

fn range_with_refinement(
    f: &Function,
    store: &RangeStore,
    ctrl_deps: &HashMap<ValueId, Vec<CtrlDep>>,
    operand: ValueId,
    context: BlockId,
) -> Range {
    refine_with(f, ctrl_deps, &|v| store.get(v), operand, context)
}

struct FiaVisitor<'a> {
    f: &'a Function,
    ctrl_deps: &'a HashMap<ValueId, Vec<CtrlDep>>,
    visited_phis: RefCell<HashSet<ValueId>>,
}

impl<'a> FiaVisitor<'a> {
    fn operand_range(&self, ctx: &Ctx<Range>, operand: ValueId, context: BlockId) -> Range {
        refine_with(self.f, self.ctrl_deps, &|v| ctx.get(v).unwrap_or(Range::Top), operand, context)
    }
}

impl<'a> Visitor<Range> for FiaVisitor<'a> {
    fn visit_fadd(&self, ctx: &Ctx<Range>, id: ValueId, lhs: ValueId, rhs: ValueId) -> Result<Range, AnalysisError> {
        let context = self.f.block_of(id);
        Ok(self.operand_range(ctx, lhs, context) + self.operand_range(ctx, rhs, context))
    }

    fn visit_fsub(&self, ctx: &Ctx<Range>, id: ValueId, lhs: ValueId, rhs: ValueId) -> Result<Range, AnalysisError> {
        let context = self.f.block_of(id);
        Ok(self.operand_range(ctx, lhs, context) - self.operand_range(ctx, rhs, context))
    }

    fn visit_fmul(&self, ctx: &Ctx<Range>, id: ValueId, lhs: ValueId, rhs: ValueId) -> Result<Range, AnalysisError> {
        let context = self.f.block_of(id);
        Ok(self.operand_range(ctx, lhs, context) * self.operand_range(ctx, rhs, context))
    }

    fn visit_fdiv(&self, ctx: &Ctx<Range>, id: ValueId, lhs: ValueId, rhs: ValueId) -> Result<Range, AnalysisError> {
        let context = self.f.block_of(id);
        Ok(self.operand_range(ctx, lhs, context) / self.operand_range(ctx, rhs, context))
    }

    fn visit_phi(
        &self,
        ctx: &Ctx<Range>,
        id: ValueId,
        incoming: &[(ValueId, BlockId)],
    ) -> Result<Range, AnalysisError> {
        let header_block = self.f.block_of(id);
        let is_header = self.f.block(header_block).loop_header == Some(header_block);
        let first_visit = !self.visited_phis.borrow().contains(&id);
        self.visited_phis.borrow_mut().insert(id);

        if is_header && first_visit {
            let mut acc: Option<Range> = None;
            for (v, pred_block) in incoming {
                // exclude operands whose defining instruction does not
                // dominate the phi, i.e. back-edges (spec.md §4.3)
                if !self.f.doms.dominates(self.f.block_of(*v), header_block) {
                    continue;
                }
                let r = self.operand_range(ctx, *v, *pred_block);
                acc = Some(match acc {
                    Some(a) => a | r,
                    None => r,
                });
            }
            acc.ok_or(AnalysisError::PhiMissingDominatingOperand { phi: id })
        } else {
            let mut acc: Option<Range> = None;
            for (v, pred_block) in incoming {
                let r = self.operand_range(ctx, *v, *pred_block);
                acc = Some(match acc {
                    Some(a) => a | r,
                    None => r,
                });
            }
            Ok(acc.unwrap_or(Range::Bottom))
        }
    }

    fn unbounded(&self) -> Range {
        Range::Top
    }
}

/// spec.md §4.3 "Minimum integer bit-width".
fn compute_min_integer_bits(
    f: &Function,
    store: &RangeStore,
    ctrl_deps: &HashMap<ValueId, Vec<CtrlDep>>,
) -> Option<u64> {
    let mut max_bits: u64 = 0;
    for idx in 0..f.value_count() {
        let v = ValueId(idx);
        match f.instr(v) {
            Instr::Jmp(_) | Instr::Br { .. } | Instr::Call { .. } | Instr::RangeAnnotation { .. }
            | Instr::FCmp(..) => continue,
            _ => {}
        }
        let context = f.block_of(v);
        match range_with_refinement(f, store, ctrl_deps, v, context) {
            Range::Bottom => {}
            Range::Top => return None,
            // A non-finite bound (inf from a zero-straddling divisor's raw
            // corner quotients, or NaN from 0/0) can never be a valid
            // two's-complement bound; treat it the same as Top (SPEC_FULL.md
            // §3 / DESIGN.md).
            Range::Interval { min, max } if !min.is_finite() || !max.is_finite() => return None,
            Range::Interval { min, max } => {
                max_bits = max_bits.max(bits_for_bound(min, max));
            }
        }
    }
    Some(max_bits)
}

fn bits_for_bound(a: f64, b: f64) -> u64 {
    let ra = if a < 0.0 { a.abs().ceil() } else { (a + 1.0).ceil() };
    let rb = if b < 0.0 { b.abs().ceil() } else { (b + 1.0).ceil() };
    let rmax = ra.max(rb).max(1.0);
    rmax.log2().ceil() as u64 + 1
}
