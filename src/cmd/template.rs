//! `collector-setup inputs-template`: print a ready-to-edit inputs file.

use anyhow::Result;

use collector_setup::inputs::SetupInputs;

pub fn cmd_inputs_template() -> Result<()> {
    println!("{}", SetupInputs::recommended().to_json_pretty()?);
    Ok(())
}
