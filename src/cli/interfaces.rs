//! Interfaces command implementation.

use clap::Args;
use vmnet_launch::helper::list_shared_interfaces;
use vmnet_launch::LauncherConfig;

/// List host interfaces usable for bridged mode.
#[derive(Args, Debug)]
pub struct InterfacesCmd {
    /// Output as JSON.
    #[arg(long)]
    pub json: bool,
}

impl InterfacesCmd {
    /// Execute the interfaces command.
    pub fn run(&self, config: &LauncherConfig) -> vmnet_launch::Result<()> {
        let interfaces = list_shared_interfaces(&config.helper_path)?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&interfaces)?);
        } else if interfaces.is_empty() {
            println!("No shared interfaces found");
        } else {
            for name in interfaces {
                println!("{}", name);
            }
        }
        Ok(())
    }
}
