// Precision (Error) Analysis (spec.md §4.4, §4.5).
//
// Consumes FIA's ranges and the internal decimal bit-width `d` to bound the
// accumulated absolute error of each value versus real arithmetic. Reuses
// the same worklist driver as FIA (`T = Option<f64>`, `None` is the top
// element / "unbounded").

use crate::dataflow::{self, Ctx, Visitor};
use crate::error::AnalysisError;
use crate::fia::FiaResult;
use crate::ir::{BlockId, Function, Instr, ValueId};
use crate::range::Range;
use std::collections::HashMap;

/// `ValueId -> Optional<error bound>`; `None` is the top element.
#[derive(Debug, Clone, Default)]
pub struct ErrorMap(pub HashMap<ValueId, Option<f64>>);

impl ErrorMap {
    pub fn get(&self, v: ValueId) -> Option<f64> {
        self.0.get(&v).copied().flatten()
    }
}

pub struct PeaResult {
    pub errors: ErrorMap,
    pub max_error: Option<f64>,
    pub equivalent_bits: Option<u64>,
    pub decimal_bits: u64,
}

/// spec.md §4.5: `d = (W - I) / 2` when `I` is valid, else `0`.
pub fn decimal_bitwidth(word_length: u64, min_integer_bits: Option<u64>) -> u64 {
    match min_integer_bits {
        Some(i) => word_length.saturating_sub(i) / 2,
        None => 0,
    }
}

pub fn analyze(f: &Function, fia: &FiaResult, word_length: u64) -> Result<PeaResult, AnalysisError> {
    let d = decimal_bitwidth(word_length, fia.min_integer_bits);
    let visitor = PeaVisitor { f, fia, d };
    let computed = dataflow::run(f, &visitor, HashMap::new())?;
    let errors = ErrorMap(computed);

    let max_error = errors
        .0
        .values()
        .filter_map(|e| *e)
        .fold(None, |acc: Option<f64>, e| Some(acc.map_or(e, |a| a.max(e))));

    let equivalent_bits = match max_error {
        Some(eps) if eps > 0.0 => Some((1.0 / eps).log2().ceil() as u64),
        _ => None,
    };

    Ok(PeaResult { errors, max_error, equivalent_bits, decimal_bits: d })
}

fn qe(d: u64) -> f64 {
    2f64.powi(-(d as i32))
}

/// spec.md §4.4 "Constant c: simulate conversion" — deliberately signed,
/// not an absolute value, even though `ErrorMap` is documented as an upper
/// bound on absolute error (spec.md §3). Preserved as specified.
fn quantize_error(c: f64, d: u64) -> f64 {
    let scale = 2f64.powi(d as i32);
    c - (c * scale).floor() / scale
}

fn magnitude(r: Range) -> Option<f64> {
    match r {
        Range::Interval { min, max } => Some(min.abs().max(max.abs())),
        _ => None,
    }
}

struct PeaVisitor<'a> {
    f: &'a Function,
    fia: &'a FiaResult,
    d: u64,
}

impl<'a> PeaVisitor<'a> {
    /// `M(v)`: max(|range.min|, |range.max|) if `v`'s FIA range is valid.
    fn m(&self, v: ValueId) -> Option<f64> {
        if let Instr::ConstF(c) = self.f.instr(v) {
            return Some(c.abs());
        }
        magnitude(self.fia.store.get(v))
    }

    fn operand_error(&self, ctx: &Ctx<Option<f64>>, v: ValueId) -> Option<f64> {
        match self.f.instr(v) {
            Instr::ConstF(c) => Some(quantize_error(*c, self.d)),
            Instr::FAdd(..) | Instr::FSub(..) | Instr::FMul(..) | Instr::FDiv(..) | Instr::Phi(..) => {
                ctx.get(v).flatten()
            }
            // non-constant leaf: argument or any other unsupported producer
            _ => Some(qe(self.d)),
        }
    }
}

impl<'a> Visitor<Option<f64>> for PeaVisitor<'a> {
    fn visit_fadd(
        &self,
        ctx: &Ctx<Option<f64>>,
        _id: ValueId,
        lhs: ValueId,
        rhs: ValueId,
    ) -> Result<Option<f64>, AnalysisError> {
        let (e1, e2) = (self.operand_error(ctx, lhs), self.operand_error(ctx, rhs));
        Ok(e1.zip(e2).map(|(a, b)| a + b))
    }

    fn visit_fsub(
        &self,
        ctx: &Ctx<Option<f64>>,
        _id: ValueId,
        lhs: ValueId,
        rhs: ValueId,
    ) -> Result<Option<f64>, AnalysisError> {
        // spec.md §4.4: FSub uses the same `e1 + e2` recurrence as FAdd.
        let (e1, e2) = (self.operand_error(ctx, lhs), self.operand_error(ctx, rhs));
        Ok(e1.zip(e2).map(|(a, b)| a + b))
    }

    fn visit_fmul(
        &self,
        ctx: &Ctx<Option<f64>>,
        _id: ValueId,
        lhs: ValueId,
        rhs: ValueId,
    ) -> Result<Option<f64>, AnalysisError> {
        let (m1, m2) = (self.m(lhs), self.m(rhs));
        let (e1, e2) = (self.operand_error(ctx, lhs), self.operand_error(ctx, rhs));
        let result = (|| Some(m1? * e2? + m2? * e1? + e1? * e2? + qe(self.d)))();
        Ok(result)
    }

    fn visit_fdiv(
        &self,
        ctx: &Ctx<Option<f64>>,
        _id: ValueId,
        lhs: ValueId,
        rhs: ValueId,
    ) -> Result<Option<f64>, AnalysisError> {
        let (m1, m2) = (self.m(lhs), self.m(rhs));
        let (e1, e2) = (self.operand_error(ctx, lhs), self.operand_error(ctx, rhs));
        let result = (|| Some((m1? / (m2? * m2?)) * e2? + (1.0 / m2?) * e1? + qe(self.d)))();
        Ok(result)
    }

    fn visit_phi(
        &self,
        ctx: &Ctx<Option<f64>>,
        _id: ValueId,
        incoming: &[(ValueId, BlockId)],
    ) -> Result<Option<f64>, AnalysisError> {
        let mut max_e = f64::NEG_INFINITY;
        for (v, _pred) in incoming {
            match self.operand_error(ctx, *v) {
                Some(e) => max_e = max_e.max(e),
                None => return Ok(None),
            }
        }
        Ok(Some(max_e))
    }

    fn unbounded(&self) -> Option<f64> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fia;
    use crate::ir::{FunctionBuilder, Instr};

    #[test]
    fn exact_constant_has_zero_error() {
        // d chosen so that 0.5 * 2^d is integral for small d.
        let mut b = FunctionBuilder::new("f");
        let entry = b.add_block();
        b.set_entry(entry);
        let c = b.emit(entry, Instr::ConstF(0.5));
        let f = b.finish();
        let fia_result = fia::analyze(&f).unwrap();
        assert_eq!(quantize_error(0.5, 4), 0.0);
        let _ = (&fia_result, c);
    }

    #[test]
    fn single_fmul_error_at_least_quantization_floor() {
        let mut b = FunctionBuilder::new("f");
        let entry = b.add_block();
        b.set_entry(entry);
        let p = b.emit(entry, Instr::Arg(0));
        b.emit(entry, Instr::RangeAnnotation { value: p, lo: -3, hi: 3 });
        let k = b.emit(entry, Instr::ConstF(2.0));
        let mul = b.emit(entry, Instr::FMul(p, k));
        let f = b.finish();

        let fia_result = fia::analyze(&f).unwrap();
        let pea_result = analyze(&f, &fia_result, 64).unwrap();
        let e = pea_result.errors.get(mul).expect("error should be bounded");
        assert!(e >= qe(pea_result.decimal_bits));
    }

    #[test]
    fn equivalent_bits_invalid_iff_error_invalid_or_zero() {
        let mut b = FunctionBuilder::new("f");
        let entry = b.add_block();
        b.set_entry(entry);
        // No range annotation on `p`, so its FIA range stays Top -> M(p) is
        // invalid -> the FMul recurrence (which needs M(p)) is invalid too.
        let p = b.emit(entry, Instr::Arg(0));
        let k = b.emit(entry, Instr::ConstF(2.0));
        let mul = b.emit(entry, Instr::FMul(p, k));
        let f = b.finish();

        let fia_result = fia::analyze(&f).unwrap();
        let pea_result = analyze(&f, &fia_result, 64).unwrap();
        assert_eq!(pea_result.errors.get(mul), None);
        assert_eq!(pea_result.max_error, None);
        assert_eq!(pea_result.equivalent_bits, None);
    }
}
