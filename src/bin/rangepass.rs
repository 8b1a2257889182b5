// Thin runnable wrapper over the library's pipeline entry point, in the
// spirit of luars's src/bin convenience binaries: no real CLI surface
// (command-line plumbing is out of scope), just enough to demo the crate
// end to end on a fixed function.

use rangepass::config::Config;
use rangepass::ir::{FunctionBuilder, Instr};
use rangepass::run_pipeline;

/// `h(p @range(-10,10)) { j = p + 15.75; return j; }` — spec.md §8 scenario.
fn demo_function() -> rangepass::ir::Function {
    let mut b = FunctionBuilder::new("h");
    let entry = b.add_block();
    b.set_entry(entry);
    let p = b.emit(entry, Instr::Arg(0));
    b.emit(entry, Instr::RangeAnnotation { value: p, lo: -10, hi: 10 });
    let k = b.emit(entry, Instr::ConstF(15.75));
    b.emit(entry, Instr::FAdd(p, k));
    b.finish()
}

fn main() {
    let config = Config::default();
    let function = demo_function();
    match run_pipeline(function, &config) {
        Ok(report) => {
            println!("min_integer_bits = {:?}", report.stats.min_integer_bits);
            println!("equivalent_bits  = {:?}", report.stats.equivalent_bits);
            println!("converted        = {}", report.stats.converted);
            println!("back_converted   = {}", report.stats.back_converted);
            for warning in &report.f2f.warnings {
                println!("warning: {}", warning);
            }
        }
        Err(e) => eprintln!("analysis failed: {}", e),
    }
}
