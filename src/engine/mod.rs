//! Core engine: the observe → decide → trade → notify loop and the paper
//! ledger it drives.

pub mod executor;
pub mod portfolio;
pub mod scan_loop;

pub use executor::{Executor, PaperTrader, Trader};
pub use portfolio::Portfolio;
pub use scan_loop::{LoopSettings, ScanLoop};
