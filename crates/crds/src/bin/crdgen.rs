//! Print the Machine and MachineSet CRDs as a multi-document YAML stream.

use anyhow::{Context, Result};
use crds::{Machine, MachineSet};
use kube::CustomResourceExt;

fn main() -> Result<()> {
    let machine = serde_yaml::to_string(&Machine::crd()).context("failed to render Machine CRD")?;
    let machine_set = serde_yaml::to_string(&MachineSet::crd()).context("failed to render MachineSet CRD")?;
    print!("{}", machine);
    println!("---");
    print!("{}", machine_set);
    Ok(())
}
