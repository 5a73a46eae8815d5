//! Decode command implementation

use nvagent_core::status::{Status, StatusLayout, StatusWord};

/// One-line description of a decoded word
pub fn describe(word: StatusWord, layout: StatusLayout) -> Result<String, nvagent_core::Error> {
    let status = word.decode(layout)?;
    let verdict = match status {
        Status::Ok => "pass succeeded",
        Status::Start { .. } => "pass still running",
        Status::Mismatch(_) => "verification failed",
        Status::BusError => "peripheral error or rejected request",
    };
    Ok(format!("{}: {} - {}", word, status, verdict))
}

/// Print the decoded form of a raw status word
pub fn run_decode(raw: u32, layout: StatusLayout) -> Result<(), Box<dyn std::error::Error>> {
    let word = StatusWord::from_raw(raw);
    println!("{}", describe(word, layout)?);

    if layout == StatusLayout::Simple && raw & !0xFF != 0 {
        log::warn!("Upper bytes are set; try --layout extended");
    }
    Ok(())
}
