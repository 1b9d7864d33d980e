//! Lodestar GPU probe
//!
//! Enumerates the machine's Vulkan devices against requirements given on the
//! command line and prints, for every candidate, either its score or the
//! requirement it failed.
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p lodestar-probe -- [OPTIONS]
//! ```
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Set log level (e.g., info, debug, trace)

mod args;

use lodestar_gpu::{
    create_device, AshProvider, InstanceBuilder, InstanceContext, PhysicalDeviceSelector,
    QueueRoles, Selection, TeardownLedger,
};
use tracing_subscriber::EnvFilter;

use crate::args::ProbeArgs;

fn main() -> anyhow::Result<()> {
    let args = ProbeArgs::parse(std::env::args().skip(1))?;
    if args.help {
        print_help();
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut ledger = TeardownLedger::new();
    let result = probe(&args, &mut ledger);

    let failures = ledger.flush();
    if failures > 0 {
        tracing::warn!("{failures} teardown action(s) failed");
    }
    result
}

fn probe(args: &ProbeArgs, ledger: &mut TeardownLedger) -> anyhow::Result<()> {
    let ctx = InstanceContext::load()?;
    let instance = InstanceBuilder::new()
        .app_name("lodestar-probe")
        .validation(args.validation_layers())
        .build(&ctx, ledger)?;

    let provider = unsafe { AshProvider::new(&instance.handle, instance.api_version) };
    let selector = PhysicalDeviceSelector::new(&provider).with_requirements(args.requirements());

    println!("Candidates:");
    for (ordinal, outcome) in selector.enumerate().iter().enumerate() {
        match outcome {
            Ok(selection) => print_selection(ordinal, selection),
            Err(e) => println!("  [{ordinal}] {e}"),
        }
    }

    let selection = selector.select()?;
    println!();
    println!("Selected: {}", selection.name());

    if args.create_device {
        let device = unsafe { create_device(&instance.handle, &selection, ledger)? };
        for role in [
            QueueRoles::GRAPHICS,
            QueueRoles::COMPUTE,
            QueueRoles::TRANSFER,
        ] {
            if let (Some(family), Some(queue)) = (device.queue_family(role), device.queue(role)) {
                println!("  {role:?} queue {queue:?} from family {family}");
            }
        }
        let failures = device.shutdown(ledger)?;
        if failures > 0 {
            anyhow::bail!("{failures} teardown action(s) failed");
        }
    }

    Ok(())
}

fn print_selection<C>(ordinal: usize, selection: &Selection<C>) {
    println!("  [{ordinal}] {}", selection.summary());
    println!(
        "      type {:?}, {} MB device-local, flags {:?}",
        selection.properties.device_type,
        selection.device_local_memory / (1024 * 1024),
        selection.flags,
    );
    if !selection.extensions.is_empty() {
        println!("      extensions: {}", selection.extensions.join(", "));
    }
    if !selection.features.is_empty() {
        println!("      features: {}", selection.features);
    }
}

fn print_help() {
    eprintln!(
        "Lodestar GPU probe

USAGE:
    cargo run -p lodestar-probe -- [OPTIONS]

REQUIREMENTS:
    --require-ext <NAME>    Reject devices without this extension (repeatable)
    --request-ext <NAME>    Prefer devices with this extension (repeatable)
    --prefer <TYPE>         Preferred device type (default: discrete)
    --require-type <TYPE>   Reject devices of any other type
    --min-memory-mb <MB>    Minimum size of the largest device-local heap
    --dedicated-compute     Prefer a compute queue family without graphics
    --dedicated-transfer    Prefer a transfer queue family without graphics

    TYPE is one of: discrete, integrated, virtual, cpu, other

OTHER:
    --validation            Require the Khronos validation layer
    --create-device         Create a logical device on the selected GPU
    -h, --help              Print this help message

ENVIRONMENT VARIABLES:
    RUST_LOG                Set log level (e.g., info, debug, trace)"
    );
}
