//! Address command implementation.

use crate::cli::parsers::parse_vm_id;
use clap::Args;
use vmnet_launch::vm::VmId;
use vmnet_launch::{Error, LauncherConfig};

/// Print the address recorded for a running VM.
#[derive(Args, Debug)]
pub struct AddressCmd {
    /// VM name.
    #[arg(value_parser = parse_vm_id)]
    pub name: VmId,
}

impl AddressCmd {
    /// Execute the address command.
    pub fn run(self, config: &LauncherConfig) -> vmnet_launch::Result<()> {
        match config.store().read_ip_address(self.name.as_str())? {
            Some(address) => {
                println!("{}", address);
                Ok(())
            }
            None => Err(Error::AddressNotFound(self.name.to_string())),
        }
    }
}
