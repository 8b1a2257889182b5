// Minimal host-IR stand-in (SPEC_FULL.md §2).
//
// spec.md treats the host compiler's IR, loop-info, scalar-evolution and
// dominator tree as external collaborators. This crate has no real host
// compiler to embed into, so it owns a small SSA IR just complete enough to
// exercise FIA/PEA/F2F end to end and unit test them. Shape is grounded in
// luars's optimizer::ssa_builder (SSAValue newtype, BasicBlock with
// predecessors/successors, a builder that hands out fresh values) — see
// reference in examples/CppCXY-lua-rs/src/optimizer/ssa_builder.rs.

use crate::error::AnalysisError;
use std::collections::HashMap;

/// Opaque handle to an SSA value. `Copy`, like the original's use of raw
/// indices into a flat instruction table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub usize);

/// Opaque handle to a basic block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub usize);

/// Floating-point compare predicates (spec.md §3, §4.3). Ordered and
/// unordered variants are kept distinct in the IR even though FIA treats
/// them identically (NaN is not modeled).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FPred {
    Oeq,
    One,
    Ogt,
    Oge,
    Olt,
    Ole,
    Ueq,
    Une,
    Ugt,
    Uge,
    Ult,
    Ule,
}

impl FPred {
    /// Logical shape of the predicate, ignoring ordered/unordered.
    pub fn kind(&self) -> PredKind {
        use FPred::*;
        match self {
            Oeq | Ueq => PredKind::Eq,
            One | Une => PredKind::Ne,
            Ogt | Ugt => PredKind::Gt,
            Oge | Uge => PredKind::Ge,
            Olt | Ult => PredKind::Lt,
            Ole | Ule => PredKind::Le,
        }
    }

    /// Translate to the signed integer predicate F2F emits (spec.md §6).
    pub fn to_signed_icmp(&self) -> IPred {
        match self.kind() {
            PredKind::Eq => IPred::Eq,
            PredKind::Ne => IPred::Ne,
            PredKind::Gt => IPred::Sgt,
            PredKind::Ge => IPred::Sge,
            PredKind::Lt => IPred::Slt,
            PredKind::Le => IPred::Sle,
        }
    }

    pub fn invert(&self) -> FPred {
        use FPred::*;
        match self {
            Oeq => One,
            One => Oeq,
            Ogt => Ole,
            Oge => Olt,
            Olt => Oge,
            Ole => Ogt,
            Ueq => Une,
            Une => Ueq,
            Ugt => Ule,
            Uge => Ult,
            Ult => Uge,
            Ule => Ugt,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredKind {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

/// Signed integer compare predicates F2F emits (spec.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IPred {
    Eq,
    Ne,
    Sgt,
    Sge,
    Slt,
    Sle,
}

/// Instructions the core reads (float half) plus the integer sub-language
/// F2F writes (SPEC_FULL.md §9). Both halves live in one `Instr` because
/// F2F rewrites in place into the same function/value table FIA and PEA
/// read from.
#[derive(Debug, Clone)]
pub enum Instr {
    // --- floating-point surface (spec.md §3) ---
    FAdd(ValueId, ValueId),
    FSub(ValueId, ValueId),
    FMul(ValueId, ValueId),
    FDiv(ValueId, ValueId),
    FCmp(FPred, ValueId, ValueId),
    Phi(Vec<(ValueId, BlockId)>),
    Br { cond: ValueId, then_bb: BlockId, else_bb: BlockId },
    Jmp(BlockId),
    ConstF(f64),
    Arg(usize),
    Call { callee: String, args: Vec<ValueId> },
    /// Models `llvm.float.range(v, lo, hi)` (spec.md §6) as a first-class
    /// instruction rather than a magic-callee-name convention.
    RangeAnnotation { value: ValueId, lo: i64, hi: i64 },

    // --- integer sub-language produced by F2F (spec.md §6, §4.6) ---
    IAdd(ValueId, ValueId),
    ISub(ValueId, ValueId),
    IMul(ValueId, ValueId),
    /// Arithmetic right shift by a compile-time-known decimal bit-width.
    IAShr(ValueId, u64),
    /// Left shift by a compile-time-known decimal bit-width.
    IShl(ValueId, u64),
    ISDiv(ValueId, ValueId),
    ConstI(i64),
    /// Fused cast + rescale: `fixedToFloat(value) = (value as float) / 2^d`
    /// (spec.md §4.6 back-conversion).
    SIToFP { value: ValueId, d: u64 },
    /// Fused rescale + cast: `floatToFixed(value) = round_toward_zero(value * 2^d)`
    /// (spec.md §4.6 operand conversion / §6 `FPToSI`).
    FPToSI { value: ValueId, d: u64 },
    ICmp(IPred, ValueId, ValueId),
    IPhi(Vec<(ValueId, BlockId)>),
}

impl Instr {
    /// Value operands of this instruction, in no particular semantic order
    /// (used by `Function::uses` and dominance-ordered conversion).
    pub fn operands(&self) -> Vec<ValueId> {
        match self {
            Instr::FAdd(a, b)
            | Instr::FSub(a, b)
            | Instr::FMul(a, b)
            | Instr::FDiv(a, b)
            | Instr::FCmp(_, a, b)
            | Instr::IAdd(a, b)
            | Instr::ISub(a, b)
            | Instr::IMul(a, b)
            | Instr::ISDiv(a, b)
            | Instr::ICmp(_, a, b) => vec![*a, *b],
            Instr::IAShr(a, _) | Instr::IShl(a, _) => vec![*a],
            Instr::Phi(incoming) | Instr::IPhi(incoming) => {
                incoming.iter().map(|(v, _)| *v).collect()
            }
            Instr::Br { cond, .. } => vec![*cond],
            Instr::Call { args, .. } => args.clone(),
            Instr::RangeAnnotation { value, .. } => vec![*value],
            Instr::SIToFP { value, .. } | Instr::FPToSI { value, .. } => vec![*value],
            Instr::Jmp(_) | Instr::ConstF(_) | Instr::Arg(_) | Instr::ConstI(_) => vec![],
        }
    }
}

/// A defined SSA value: which block it lives in and its instruction.
#[derive(Debug, Clone)]
pub struct ValueDef {
    pub block: BlockId,
    pub instr: Instr,
}

#[derive(Debug, Clone)]
pub struct Block {
    pub id: BlockId,
    pub preds: Vec<BlockId>,
    pub succs: Vec<BlockId>,
    /// Program order of values defined in this block.
    pub insts: Vec<ValueId>,
    /// Nearest enclosing loop's header, if this block is inside a loop.
    /// Stands in for LoopInfo membership (SPEC_FULL.md §4) without a full
    /// loop-nest analysis.
    pub loop_header: Option<BlockId>,
}

/// Stands in for `ScalarEvolution::getMaxBackedgeTakenCount` (spec.md §6).
/// `None` means an unknown trip count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopInfo {
    pub header: BlockId,
    pub trip_count: Option<u64>,
}

/// Precomputed dominator relation, built once by `FunctionBuilder::finish`
/// via the standard iterative intersect-idoms-to-fixpoint algorithm.
#[derive(Debug, Clone)]
pub struct DominatorTree {
    idom: HashMap<BlockId, Option<BlockId>>,
    entry: BlockId,
}

impl DominatorTree {
    /// Entry dominates every reachable block; walk idom chains otherwise.
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        if a == b {
            return true;
        }
        let mut cur = b;
        loop {
            match self.idom.get(&cur).copied().flatten() {
                Some(idom) => {
                    if idom == a {
                        return true;
                    }
                    cur = idom;
                }
                None => return cur == a && cur == self.entry,
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    values: Vec<Option<ValueDef>>,
    pub blocks: Vec<Block>,
    pub entry: BlockId,
    pub loops: HashMap<BlockId, LoopInfo>,
    pub doms: DominatorTree,
}

impl Function {
    pub fn instr(&self, v: ValueId) -> &Instr {
        &self.values[v.0].as_ref().expect("dangling ValueId").instr
    }

    pub fn def(&self, v: ValueId) -> &ValueDef {
        self.values[v.0].as_ref().expect("dangling ValueId")
    }

    pub fn block_of(&self, v: ValueId) -> BlockId {
        self.def(v).block
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.0]
    }

    pub fn loop_header_of(&self, v: ValueId) -> Option<BlockId> {
        self.block(self.block_of(v)).loop_header
    }

    /// Sole predecessor of `b`, if it has exactly one (spec.md §4.3:
    /// control dependency is only recorded when this holds, which is what
    /// guarantees every use in `b` is dominated by the branch outcome).
    pub fn single_pred(&self, b: BlockId) -> Option<BlockId> {
        let preds = &self.block(b).preds;
        if preds.len() == 1 {
            Some(preds[0])
        } else {
            None
        }
    }

    /// Function-wide program order: blocks in creation order, instructions
    /// in per-block program order. Mirrors `inst_begin(F)..inst_end(F)`.
    pub fn program_order(&self) -> Vec<ValueId> {
        self.blocks.iter().flat_map(|b| b.insts.iter().copied()).collect()
    }

    /// Whether `def`'s instruction precedes `use_site`'s in the same block,
    /// or `def`'s block strictly dominates `use_site`'s block. Used by
    /// F2F's back-conversion dominance check (spec.md §4.6).
    pub fn dominates_use(&self, def: ValueId, use_site: ValueId) -> bool {
        let def_block = self.block_of(def);
        let use_block = self.block_of(use_site);
        if def_block == use_block {
            let insts = &self.block(def_block).insts;
            let def_pos = insts.iter().position(|v| *v == def);
            let use_pos = insts.iter().position(|v| *v == use_site);
            match (def_pos, use_pos) {
                (Some(d), Some(u)) => d < u,
                _ => false,
            }
        } else {
            self.doms.dominates(def_block, use_block)
        }
    }

    /// Instructions that use `v` as an operand, resolved to the instructions
    /// that own them. A dangling operand handle (pointing at nothing) is a
    /// fatal `NonInstructionUse` (spec.md §7, §4.2 "encountering a
    /// non-instruction use is a fatal IR-shape error").
    pub fn uses(&self, v: ValueId) -> Result<Vec<ValueId>, AnalysisError> {
        let mut out = Vec::new();
        for (idx, slot) in self.values.iter().enumerate() {
            let def = match slot {
                Some(d) => d,
                None => continue,
            };
            for operand in def.instr.operands() {
                if operand == v {
                    if operand.0 >= self.values.len() || self.values[operand.0].is_none() {
                        return Err(AnalysisError::NonInstructionUse { value: operand });
                    }
                    out.push(ValueId(idx));
                    break;
                }
            }
        }
        Ok(out)
    }

    pub fn value_count(&self) -> usize {
        self.values.len()
    }

    /// Allocate a fresh value slot for an instruction created after initial
    /// construction (used by F2F). The IR owns it immediately, per spec.md
    /// §3 "handed to the IR owner immediately on creation".
    pub(crate) fn push_value(&mut self, block: BlockId, instr: Instr) -> ValueId {
        let id = ValueId(self.values.len());
        self.values.push(Some(ValueDef { block, instr }));
        id
    }

    /// Insert a newly created value into a block's program order right
    /// after `after` (or at the front if `after` is `None`).
    pub(crate) fn insert_after(&mut self, block: BlockId, after: Option<ValueId>, id: ValueId) {
        let insts = &mut self.blocks[block.0].insts;
        let pos = match after {
            Some(a) => insts.iter().position(|v| *v == a).map(|p| p + 1).unwrap_or(insts.len()),
            None => 0,
        };
        insts.insert(pos, id);
    }

    /// Replace an existing instruction's body in place (F2F rewrite).
    pub(crate) fn replace_instr(&mut self, v: ValueId, instr: Instr) {
        self.values[v.0].as_mut().expect("dangling ValueId").instr = instr;
    }
}

/// Ergonomic builder used by tests and the driver instead of hand-assembling
/// `Function` literals, grounded in luars's `SSABuilder`.
pub struct FunctionBuilder {
    name: String,
    values: Vec<Option<ValueDef>>,
    blocks: Vec<Block>,
    entry: Option<BlockId>,
    loops: HashMap<BlockId, LoopInfo>,
}

impl FunctionBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), values: Vec::new(), blocks: Vec::new(), entry: None, loops: HashMap::new() }
    }

    pub fn add_block(&mut self) -> BlockId {
        let id = BlockId(self.blocks.len());
        self.blocks.push(Block { id, preds: vec![], succs: vec![], insts: vec![], loop_header: None });
        id
    }

    pub fn set_entry(&mut self, b: BlockId) {
        self.entry = Some(b);
    }

    pub fn connect(&mut self, from: BlockId, to: BlockId) {
        self.blocks[from.0].succs.push(to);
        self.blocks[to.0].preds.push(from);
    }

    pub fn emit(&mut self, block: BlockId, instr: Instr) -> ValueId {
        let id = ValueId(self.values.len());
        self.values.push(Some(ValueDef { block, instr }));
        self.blocks[block.0].insts.push(id);
        id
    }

    /// Mark every block in `body` (headed by `header`, `header` included) as
    /// belonging to a loop with the given (possibly unknown) trip count.
    pub fn mark_loop(&mut self, header: BlockId, body: &[BlockId], trip_count: Option<u64>) {
        self.loops.insert(header, LoopInfo { header, trip_count });
        for b in body {
            self.blocks[b.0].loop_header = Some(header);
        }
        self.blocks[header.0].loop_header = Some(header);
    }

    /// Computes dominators via the classic iterative fixpoint (intersect
    /// idoms of processed predecessors, entry dominates itself) and hands
    /// back an immutable `Function`.
    pub fn finish(self) -> Function {
        let entry = self.entry.expect("FunctionBuilder::finish: no entry block set");
        let doms = compute_dominators(&self.blocks, entry);
        Function {
            name: self.name,
            values: self.values,
            blocks: self.blocks,
            entry,
            loops: self.loops,
            doms,
        }
    }
}

fn compute_dominators(blocks: &[Block], entry: BlockId) -> DominatorTree {
    // Reverse postorder over reachable blocks, entry first.
    let mut rpo = Vec::new();
    let mut visited = vec![false; blocks.len()];
    fn dfs(b: BlockId, blocks: &[Block], visited: &mut [bool], out: &mut Vec<BlockId>) {
        if visited[b.0] {
            return;
        }
        visited[b.0] = true;
        for &s in &blocks[b.0].succs {
            dfs(s, blocks, visited, out);
        }
        out.push(b);
    }
    dfs(entry, blocks, &mut visited, &mut rpo);
    rpo.reverse();

    let order_index: HashMap<BlockId, usize> =
        rpo.iter().enumerate().map(|(i, b)| (*b, i)).collect();

    let mut idom: HashMap<BlockId, Option<BlockId>> = HashMap::new();
    idom.insert(entry, Some(entry));

    let mut changed = true;
    while changed {
        changed = false;
        for &b in rpo.iter().skip(1) {
            let preds: Vec<BlockId> = blocks[b.0]
                .preds
                .iter()
                .copied()
                .filter(|p| idom.get(p).map(|i| i.is_some()).unwrap_or(false))
                .collect();
            if preds.is_empty() {
                continue;
            }
            let mut new_idom = preds[0];
            for &p in &preds[1..] {
                new_idom = intersect(new_idom, p, &idom, &order_index);
            }
            let changed_here = idom.get(&b).copied().flatten() != Some(new_idom);
            if changed_here {
                idom.insert(b, Some(new_idom));
                changed = true;
            }
        }
    }
    // entry's own idom slot is a self-loop sentinel, not a real dominator;
    // clear it so `dominates` treats it as the base case.
    idom.insert(entry, None);

    DominatorTree { idom, entry }
}

fn intersect(
    mut a: BlockId,
    mut b: BlockId,
    idom: &HashMap<BlockId, Option<BlockId>>,
    order_index: &HashMap<BlockId, usize>,
) -> BlockId {
    while a != b {
        while order_index[&a] > order_index[&b] {
            a = idom[&a].unwrap_or(a);
            if idom[&a].is_none() {
                break;
            }
        }
        while order_index.get(&b).is_some() && order_index[&b] > order_index[&a] {
            b = idom[&b].unwrap_or(b);
            if idom[&b].is_none() {
                break;
            }
        }
        if a == b {
            break;
        }
        if idom[&a].is_none() || idom[&b].is_none() {
            break;
        }
    }
    a
}
