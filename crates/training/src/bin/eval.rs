use clap::Parser;
use training::{init_tracing, run_eval, EvalArgs};

fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = EvalArgs::parse();
    let report = run_eval(args)?;
    println!(
        "Eval complete: steps={} loss={:.4} ade={:.3} fde={:.3} min_ade={:.3}",
        report.steps, report.loss, report.ade, report.fde, report.min_ade
    );
    Ok(())
}
