//! `collector-setup steps`: print the step catalog.

use anyhow::Result;
use console::style;

use collector_setup::step::Action;
use collector_setup::steps;

pub fn cmd_steps() -> Result<()> {
    let segment_names = ["core", "log insights", "automated explain", "finalize"];
    let mut number = 1;
    for (name, segment) in segment_names.iter().zip(steps::segments()) {
        println!("{}", style(name).bold().underlined());
        for step in segment {
            let check_only = if step.has_resolution() {
                String::new()
            } else {
                format!(" {}", style("(check only)").dim())
            };
            println!(
                "{:>3}. {:<46} {:<18} {}{}",
                number,
                style(step.id()).cyan(),
                style(format!("[{}]", step.kind())).dim(),
                step.description(),
                check_only
            );
            number += 1;
        }
        println!();
    }
    Ok(())
}
