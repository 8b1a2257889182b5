// Float interval / precision / fixed-point conversion pipeline (spec.md
// §1). Three per-function passes composed bottom-up: Float Interval
// Analysis feeds Precision Analysis, both feed the Float-to-Fixed
// transform. Driver shape is grounded in luars's top-level `execute`/
// `execute_with_vm` chain (compile, then run) — see src/lib.rs there.

pub mod config;
pub mod dataflow;
pub mod error;
pub mod f2f;
pub mod fia;
pub mod ir;
pub mod pea;
pub mod range;

use config::Config;
use error::{AnalysisError, AnalysisErrorWithContext};
use f2f::F2fResult;
use fia::FiaResult;
use ir::Function;
use pea::PeaResult;

/// Summary counters pulled out of the three per-pass results (spec.md §1's
/// "statistics collection" external collaborator, reduced to a plain struct
/// since this crate owns its own IR end to end).
#[derive(Debug, Clone, Copy)]
pub struct Stats {
    pub converted: u64,
    pub back_converted: u64,
    pub min_integer_bits: Option<u64>,
    pub equivalent_bits: Option<u64>,
}

pub struct PipelineReport {
    pub fia: FiaResult,
    pub pea: PeaResult,
    pub f2f: F2fResult,
    pub stats: Stats,
}

/// Runs FIA, then PEA (consuming FIA's ranges and `config.word_length`),
/// then F2F (consuming both). Any `AnalysisError` is wrapped with the
/// function's name for context before being returned.
pub fn run_pipeline(function: Function, config: &Config) -> Result<PipelineReport, AnalysisErrorWithContext> {
    let name = function.name.clone();
    let attach = |e: AnalysisError| AnalysisErrorWithContext::new(name.clone(), e);

    let fia_result = fia::analyze(&function).map_err(attach)?;
    let pea_result = pea::analyze(&function, &fia_result, config.word_length).map_err(attach)?;
    let f2f_result = f2f::transform(function, &fia_result, &pea_result, config).map_err(attach)?;

    let stats = Stats {
        converted: f2f_result.converted_count,
        back_converted: f2f_result.back_converted_count,
        min_integer_bits: fia_result.min_integer_bits,
        equivalent_bits: pea_result.equivalent_bits,
    };

    Ok(PipelineReport { fia: fia_result, pea: pea_result, f2f: f2f_result, stats })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ir::{FunctionBuilder, Instr};

    #[test]
    fn pipeline_runs_end_to_end_on_a_simple_function() {
        // f(p @range(-10,10)) { k = 2.0; return p * k; }
        let mut b = FunctionBuilder::new("f");
        let entry = b.add_block();
        b.set_entry(entry);
        let p = b.emit(entry, Instr::Arg(0));
        b.emit(entry, Instr::RangeAnnotation { value: p, lo: -10, hi: 10 });
        let k = b.emit(entry, Instr::ConstF(2.0));
        let mul = b.emit(entry, Instr::FMul(p, k));
        let f = b.finish();

        let report = run_pipeline(f, &Config::default()).unwrap();
        // p in [-10,10] -> 5 bits, k=2.0 (point) -> 3 bits, p*k in [-20,20] -> 6 bits.
        assert_eq!(report.stats.min_integer_bits, Some(6));
        assert!(report.stats.equivalent_bits.is_some());
        let _ = mul;
    }

    #[test]
    fn pipeline_reports_error_with_function_context() {
        // entry -> header -> body -> header (back edge). The header phi's
        // only incoming value is defined in `body`, which `header` itself
        // dominates rather than the other way around, so it is excluded as
        // a back-edge operand and the phi has nothing left to join from.
        let mut b = FunctionBuilder::new("broken");
        let entry = b.add_block();
        let header = b.add_block();
        let body = b.add_block();
        b.set_entry(entry);
        b.connect(entry, header);
        b.connect(header, body);
        b.connect(body, header);

        let body_val = b.emit(body, Instr::ConstF(0.0));
        let phi = b.emit(header, Instr::Phi(vec![(body_val, body)]));
        b.mark_loop(header, &[header, body], Some(1));
        let f = b.finish();

        let err = run_pipeline(f, &Config::default()).unwrap_err();
        assert_eq!(err.function, "broken");
        let _ = phi;
    }
}
