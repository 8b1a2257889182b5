// Float-to-Fixed transformer (spec.md §4.6, §6).
//
// The only mutating pass: rewrites eligible floating-point IR to integer
// arithmetic, inserting explicit conversion casts at dominance-respecting
// boundaries. New instructions are appended to the function's value table
// and spliced into their block's program order immediately (spec.md §3:
// "handed to the IR owner immediately on creation").

use crate::config::Config;
use crate::error::AnalysisError;
use crate::fia::FiaResult;
use crate::ir::{BlockId, Function, Instr, ValueId};
use crate::pea::PeaResult;
use crate::range::Range;
use std::collections::HashMap;

/// `converted_values`: float producer -> its fixed-point replacement.
/// For an eligible arithmetic/phi instruction the replacement is the same
/// `ValueId`, rewritten in place; for a constant or argument leaf it is a
/// freshly created `ConstI`/`FPToSI` value. `converted_back`: fixed value ->
/// the float value reconstructed from it (memoized so at most one
/// back-conversion is ever inserted per fixed value).
#[derive(Debug, Clone, Default)]
pub struct ConversionCache {
    pub converted_values: HashMap<ValueId, ValueId>,
    pub converted_back: HashMap<ValueId, ValueId>,
}

pub struct F2fResult {
    pub function: Function,
    pub converted_count: u64,
    pub back_converted_count: u64,
    pub warnings: Vec<String>,
}

pub fn transform(
    mut func: Function,
    fia: &FiaResult,
    pea: &PeaResult,
    config: &Config,
) -> Result<F2fResult, AnalysisError> {
    let d = if config.is_unchecked_mode() { config.internal_bitwidth } else { pea.decimal_bits };
    let mut cache = ConversionCache::default();
    let mut warnings = Vec::new();
    let mut converted_count = 0u64;

    let original_order = func.program_order();
    for v in original_order {
        if !is_eligible(&func, fia, pea, config, d, v) {
            continue;
        }
        rewrite_instruction(&mut func, &mut cache, d, v)?;
        cache.converted_values.insert(v, v);
        converted_count += 1;
    }

    back_convert_pass(&mut func, &mut cache, d, &mut warnings);
    let back_converted_count = cache.converted_back.len() as u64;

    Ok(F2fResult { function: func, converted_count, back_converted_count, warnings })
}

fn valid(r: Range) -> bool {
    matches!(r, Range::Interval { .. })
}

/// Range of `v` as observed from `context` (the block doing the reading),
/// refined by any control dependency that reaches `context` — the same
/// query `FiaResult::range_of` exposes for any other consumer.
fn range_in_context(f: &Function, fia: &FiaResult, v: ValueId, context: BlockId) -> Range {
    fia.range_of(f, v, context)
}

/// `v`'s own range, as seen from the block it's defined in — what
/// `fia::compute_min_integer_bits` used to decide `min_integer_bits`/`B_eq`.
fn own_range(f: &Function, fia: &FiaResult, v: ValueId) -> Range {
    range_in_context(f, fia, v, f.block_of(v))
}

fn fits_headroom(r: Range, bits: i64) -> bool {
    if bits <= 0 {
        return false;
    }
    match r {
        Range::Bottom => true,
        Range::Top => false,
        Range::Interval { min, max } => {
            let limit = 2f64.powi((bits - 1) as i32);
            (-min) < limit && max < limit
        }
    }
}

fn is_eligible(
    f: &Function,
    fia: &FiaResult,
    pea: &PeaResult,
    config: &Config,
    d: u64,
    v: ValueId,
) -> bool {
    if config.is_unchecked_mode() {
        is_eligible_unchecked(f, fia, config, d, v)
    } else {
        is_eligible_precision_guided(f, fia, pea, config, v)
    }
}

/// spec.md §4.6 unchecked mode: `I = W - 2d`; an instruction is eligible
/// iff it is not a compare and its own range and every operand's range fit
/// within `I` integer bits. Compares are excluded entirely (spec.md §9:
/// "the asymmetry appears intentional... unchecked mode is purely a debug
/// aid").
fn is_eligible_unchecked(f: &Function, fia: &FiaResult, config: &Config, d: u64, v: ValueId) -> bool {
    let i = config.word_length as i64 - 2 * d as i64;
    let context = f.block_of(v);
    match f.instr(v) {
        Instr::FCmp(..) => false,
        Instr::FAdd(a, b) | Instr::FSub(a, b) | Instr::FMul(a, b) | Instr::FDiv(a, b) => {
            fits_headroom(own_range(f, fia, v), i)
                && fits_headroom(range_in_context(f, fia, *a, context), i)
                && fits_headroom(range_in_context(f, fia, *b, context), i)
        }
        Instr::Phi(incoming) => {
            fits_headroom(own_range(f, fia, v), i)
                && incoming
                    .iter()
                    .all(|(op, pred)| fits_headroom(range_in_context(f, fia, *op, *pred), i))
        }
        _ => false,
    }
}

/// spec.md §4.6 precision-guided mode: eligible iff `B_eq` is valid and
/// `>= P_req`, and either the instruction is an `FCmp` with both operand
/// ranges valid, or its own range is not `Top`.
fn is_eligible_precision_guided(
    f: &Function,
    fia: &FiaResult,
    pea: &PeaResult,
    config: &Config,
    v: ValueId,
) -> bool {
    match pea.equivalent_bits {
        Some(b) if b >= config.precision_bitwidth => {}
        _ => return false,
    }
    let context = f.block_of(v);
    match f.instr(v) {
        Instr::FCmp(_, a, b) => {
            valid(range_in_context(f, fia, *a, context)) && valid(range_in_context(f, fia, *b, context))
        }
        Instr::FAdd(..) | Instr::FSub(..) | Instr::FMul(..) | Instr::FDiv(..) | Instr::Phi(..) => {
            !own_range(f, fia, v).is_top()
        }
        _ => false,
    }
}

fn predecessor_in_block(func: &Function, v: ValueId) -> Option<ValueId> {
    let block = func.block_of(v);
    let insts = &func.block(block).insts;
    let pos = insts.iter().position(|x| *x == v)?;
    if pos == 0 {
        None
    } else {
        Some(insts[pos - 1])
    }
}

fn rewrite_instruction(
    func: &mut Function,
    cache: &mut ConversionCache,
    d: u64,
    v: ValueId,
) -> Result<(), AnalysisError> {
    let instr = func.instr(v).clone();
    let block = func.block_of(v);
    let new_instr = match instr {
        Instr::FAdd(l, r) => {
            let (cl, cr) = convert_pair(func, cache, d, l, r)?;
            Instr::IAdd(cl, cr)
        }
        Instr::FSub(l, r) => {
            let (cl, cr) = convert_pair(func, cache, d, l, r)?;
            Instr::ISub(cl, cr)
        }
        Instr::FMul(l, r) => {
            let (cl, cr) = convert_pair(func, cache, d, l, r)?;
            let before = predecessor_in_block(func, v);
            let mul_id = func.push_value(block, Instr::IMul(cl, cr));
            func.insert_after(block, before, mul_id);
            Instr::IAShr(mul_id, d)
        }
        Instr::FDiv(l, r) => {
            let (cl, cr) = convert_pair(func, cache, d, l, r)?;
            let before = predecessor_in_block(func, v);
            let shifted_id = func.push_value(block, Instr::IShl(cl, d));
            func.insert_after(block, before, shifted_id);
            Instr::ISDiv(shifted_id, cr)
        }
        Instr::Phi(incoming) => {
            let mut converted = Vec::with_capacity(incoming.len());
            for (val, pred_block) in incoming {
                let c = convert_operand(func, cache, d, val)?;
                converted.push((c, pred_block));
            }
            Instr::IPhi(converted)
        }
        Instr::FCmp(pred, l, r) => {
            let (cl, cr) = convert_pair(func, cache, d, l, r)?;
            Instr::ICmp(pred.to_signed_icmp(), cl, cr)
        }
        _ => return Err(AnalysisError::UnsupportedOpcode { value: v }),
    };
    func.replace_instr(v, new_instr);
    Ok(())
}

fn convert_pair(
    func: &mut Function,
    cache: &mut ConversionCache,
    d: u64,
    l: ValueId,
    r: ValueId,
) -> Result<(ValueId, ValueId), AnalysisError> {
    let cl = convert_operand(func, cache, d, l)?;
    let cr = convert_operand(func, cache, d, r)?;
    Ok((cl, cr))
}

/// Operand conversion (spec.md §4.6): looks up the cache, or converts via
/// `floatToFixed`: a float constant becomes an embedded integer literal; an
/// instruction-produced float gets a cast spliced in immediately after its
/// definition; a function argument gets the same cast at the entry block's
/// head; anything already rewritten in place is used as-is.
fn convert_operand(
    func: &mut Function,
    cache: &mut ConversionCache,
    d: u64,
    operand: ValueId,
) -> Result<ValueId, AnalysisError> {
    if let Some(existing) = cache.converted_values.get(&operand) {
        return Ok(*existing);
    }
    let converted = match func.instr(operand).clone() {
        Instr::ConstF(c) => {
            let lit = (c * 2f64.powi(d as i32)).floor() as i64;
            let block = func.block_of(operand);
            let id = func.push_value(block, Instr::ConstI(lit));
            func.insert_after(block, Some(operand), id);
            id
        }
        Instr::Arg(_) => {
            let entry = func.entry;
            let id = func.push_value(entry, Instr::FPToSI { value: operand, d });
            func.insert_after(entry, None, id);
            id
        }
        Instr::IAdd(..)
        | Instr::ISub(..)
        | Instr::IMul(..)
        | Instr::IAShr(..)
        | Instr::IShl(..)
        | Instr::ISDiv(..)
        | Instr::ConstI(..)
        | Instr::SIToFP { .. }
        | Instr::FPToSI { .. }
        | Instr::ICmp(..)
        | Instr::IPhi(..) => operand,
        Instr::FAdd(..)
        | Instr::FSub(..)
        | Instr::FMul(..)
        | Instr::FDiv(..)
        | Instr::FCmp(..)
        | Instr::Phi(..)
        | Instr::Call { .. } => {
            let block = func.block_of(operand);
            let id = func.push_value(block, Instr::FPToSI { value: operand, d });
            func.insert_after(block, Some(operand), id);
            id
        }
        Instr::Br { .. } | Instr::Jmp(_) | Instr::RangeAnnotation { .. } => {
            return Err(AnalysisError::ExpectedFloatConstant { value: operand });
        }
    };
    cache.converted_values.insert(operand, converted);
    Ok(converted)
}

fn is_still_float(instr: &Instr) -> bool {
    matches!(
        instr,
        Instr::FAdd(..)
            | Instr::FSub(..)
            | Instr::FMul(..)
            | Instr::FDiv(..)
            | Instr::FCmp(..)
            | Instr::Phi(..)
            | Instr::Br { .. }
            | Instr::Jmp(..)
            | Instr::Call { .. }
            | Instr::ConstF(..)
            | Instr::Arg(..)
    )
}

fn sub_operand(v: ValueId, old: ValueId, new: ValueId) -> ValueId {
    if v == old {
        new
    } else {
        v
    }
}

fn substitute_operand(func: &mut Function, user: ValueId, old: ValueId, new: ValueId) {
    let instr = func.instr(user).clone();
    let replaced = match instr {
        Instr::FAdd(a, b) => Instr::FAdd(sub_operand(a, old, new), sub_operand(b, old, new)),
        Instr::FSub(a, b) => Instr::FSub(sub_operand(a, old, new), sub_operand(b, old, new)),
        Instr::FMul(a, b) => Instr::FMul(sub_operand(a, old, new), sub_operand(b, old, new)),
        Instr::FDiv(a, b) => Instr::FDiv(sub_operand(a, old, new), sub_operand(b, old, new)),
        Instr::FCmp(p, a, b) => Instr::FCmp(p, sub_operand(a, old, new), sub_operand(b, old, new)),
        Instr::Phi(incoming) => {
            Instr::Phi(incoming.into_iter().map(|(v, bb)| (sub_operand(v, old, new), bb)).collect())
        }
        Instr::Br { cond, then_bb, else_bb } => {
            Instr::Br { cond: sub_operand(cond, old, new), then_bb, else_bb }
        }
        Instr::Call { callee, args } => Instr::Call {
            callee,
            args: args.into_iter().map(|a| sub_operand(a, old, new)).collect(),
        },
        other => other,
    };
    func.replace_instr(user, replaced);
}

/// spec.md §4.6 "Back-conversion pass": second sweep over every
/// non-eligible instruction (i.e. still float-shaped after the rewrite
/// sweep), substituting any operand that has a fixed-point replacement
/// with either the replacement directly (if it is a compare) or a
/// memoized `fixedToFloat` reconstruction.
///
/// Convert only instructions here: a parameter or a float constant is "born
/// floating point" (its own definition is never rewritten in place), so its
/// `converted_values` entry is only a shadow copy made for some eligible
/// arithmetic use, not a replacement of the operand itself. A non-eligible
/// use of the same `Arg`/`ConstF` operand still sees the original, unchanged
/// float value and needs no back-conversion.
fn back_convert_pass(func: &mut Function, cache: &mut ConversionCache, d: u64, warnings: &mut Vec<String>) {
    let snapshot = func.program_order();
    for v in snapshot {
        if !is_still_float(func.instr(v)) {
            continue;
        }
        for operand in func.instr(v).clone().operands() {
            if matches!(func.instr(operand), Instr::Arg(..) | Instr::ConstF(..)) {
                continue;
            }
            let fixed = match cache.converted_values.get(&operand).copied() {
                Some(f) => f,
                None => continue,
            };
            if matches!(func.instr(fixed), Instr::ICmp(..)) {
                substitute_operand(func, v, operand, fixed);
                continue;
            }
            if !func.dominates_use(fixed, v) {
                warnings.push(format!(
                    "skipped back-conversion of {:?} at use {:?}: fixed-point definition does not dominate the use",
                    fixed, v
                ));
                continue;
            }
            let back = if let Some(&cached) = cache.converted_back.get(&fixed) {
                cached
            } else {
                let block = func.block_of(fixed);
                let id = func.push_value(block, Instr::SIToFP { value: fixed, d });
                func.insert_after(block, Some(fixed), id);
                cache.converted_back.insert(fixed, id);
                id
            };
            substitute_operand(func, v, operand, back);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::fia;
    use crate::ir::{FunctionBuilder, Instr};
    use crate::pea;

    fn run_pipeline_test(f: Function, config: &Config) -> F2fResult {
        let fia_result = fia::analyze(&f).unwrap();
        let pea_result = pea::analyze(&f, &fia_result, config.word_length).unwrap();
        transform(f, &fia_result, &pea_result, config).unwrap()
    }

    #[test]
    fn unchecked_mode_converts_everything_that_fits_and_skips_compares() {
        let mut b = FunctionBuilder::new("h");
        let entry = b.add_block();
        b.set_entry(entry);
        let p = b.emit(entry, Instr::Arg(0));
        b.emit(entry, Instr::RangeAnnotation { value: p, lo: -10, hi: 10 });
        let c = b.emit(entry, Instr::ConstF(2.0));
        let add = b.emit(entry, Instr::FAdd(p, c));
        let cmp = b.emit(entry, Instr::FCmp(crate::ir::FPred::Ogt, add, c));
        let f = b.finish();

        let config = Config { internal_bitwidth: 8, ..Config::default() };
        let result = run_pipeline_test(f, &config);
        assert!(matches!(result.function.instr(add), Instr::IAdd(..)));
        assert!(matches!(result.function.instr(cmp), Instr::FCmp(..)));
        assert_eq!(result.converted_count, 1);
    }

    #[test]
    fn precision_guided_mode_converts_and_back_converts_at_the_boundary() {
        // h(p @range(-10,10)) { j = p + 15.75; return j; }
        let mut b = FunctionBuilder::new("h");
        let entry = b.add_block();
        b.set_entry(entry);
        let p = b.emit(entry, Instr::Arg(0));
        b.emit(entry, Instr::RangeAnnotation { value: p, lo: -10, hi: 10 });
        let k = b.emit(entry, Instr::ConstF(15.75));
        let j = b.emit(entry, Instr::FAdd(p, k));
        // an unconvertible use that forces a back-conversion: a call taking j.
        let _sink = b.emit(entry, Instr::Call { callee: "sink".into(), args: vec![j] });
        let f = b.finish();

        let config = Config::default();
        let result = run_pipeline_test(f, &config);
        assert!(matches!(result.function.instr(j), Instr::IAdd(..)));
        assert_eq!(result.converted_count, 1);
        assert_eq!(result.back_converted_count, 1);
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn range_annotation_and_direct_argument_uses_never_trigger_back_conversion() {
        // h(p @range(-10,10)) { j = p + 15.75; return j; } with no other
        // sink of `j` and no other use of `p` beyond its own
        // RangeAnnotation. `p`'s converted_values shadow (made for `j`'s
        // conversion) must not be mistaken for a replacement of `p` itself:
        // the RangeAnnotation is not an instruction needing a float value,
        // so it must not count as a back-conversion.
        let mut b = FunctionBuilder::new("h");
        let entry = b.add_block();
        b.set_entry(entry);
        let p = b.emit(entry, Instr::Arg(0));
        b.emit(entry, Instr::RangeAnnotation { value: p, lo: -10, hi: 10 });
        let k = b.emit(entry, Instr::ConstF(15.75));
        let j = b.emit(entry, Instr::FAdd(p, k));
        let f = b.finish();

        let config = Config::default();
        let result = run_pipeline_test(f, &config);
        assert!(matches!(result.function.instr(j), Instr::IAdd(..)));
        assert_eq!(result.converted_count, 1);
        assert_eq!(result.back_converted_count, 0);
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn unbounded_loop_value_is_never_eligible() {
        // g(p @range(10,20)) { a = p; loop(unknown trip count): a = a + p; }
        // FIA abandons `a`'s phi to Top, which makes it ineligible in both
        // unchecked mode (no headroom check passes against Top) and
        // precision-guided mode (its own range is Top).
        let mut b = FunctionBuilder::new("g");
        let entry = b.add_block();
        let header = b.add_block();
        b.set_entry(entry);
        b.connect(entry, header);
        b.connect(header, header);

        let p = b.emit(entry, Instr::Arg(0));
        b.emit(entry, Instr::RangeAnnotation { value: p, lo: 10, hi: 20 });

        let a_phi = b.emit(header, Instr::Phi(vec![(p, entry)]));
        let a_next = b.emit(header, Instr::FAdd(a_phi, p));
        b.mark_loop(header, &[header], None);
        let f = b.finish();

        let config = Config::default();
        let fia_result = fia::analyze(&f).unwrap();
        assert_eq!(fia_result.store.get(a_phi), Range::Top);
        let pea_result = pea::analyze(&f, &fia_result, config.word_length).unwrap();
        let result = transform(f, &fia_result, &pea_result, &config).unwrap();
        assert_eq!(result.converted_count, 0);
        assert!(matches!(result.function.instr(a_next), Instr::FAdd(..)));
    }
}
