/// System module: interpreter discovery and bounded subprocess execution

pub mod interpreter;
pub mod process;

/// Log a high-level milestone (written to both the full and parsed logs)
#[macro_export]
macro_rules! log_parsed {
    ($($arg:tt)*) => {{
        let msg = format!($($arg)*);
        log::info!(target: "parsed", "{}", msg);
    }}
}
