//! Check capabilities.

use lectern_capture_engine::CapabilityNegotiator;

pub fn run() -> anyhow::Result<()> {
    println!("Lectern Capability Check");
    println!("{}", "=".repeat(50));

    let negotiator = CapabilityNegotiator::default();
    let capabilities = negotiator.detect();

    let mark = |ok: bool| if ok { "[OK]  " } else { "[WARN]" };
    println!("{} Compositing", mark(capabilities.can_composite));
    println!("{} Recording", mark(capabilities.can_record));

    println!();
    println!("Codecs (priority order):");
    for codec in &capabilities.supported_codecs {
        println!("     {} (.{})", codec.mime_type(), codec.extension());
    }
    let selected = negotiator.select_codec(&capabilities);
    println!("Selected: {}", selected.mime_type());

    if !capabilities.warnings.is_empty() {
        println!();
        for warning in &capabilities.warnings {
            println!("[WARN] {warning}");
        }
    }

    println!();
    if capabilities.can_record {
        println!("Lectern is ready to record.");
    } else {
        println!("Recording is unavailable on this system.");
    }
    Ok(())
}
