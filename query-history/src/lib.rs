mod bridge;
mod facade;
mod history;
mod mem;
mod provider;
mod rpc;
mod strand;

pub use bridge::*;
pub use facade::*;
pub use history::*;
pub use mem::*;
pub use provider::*;
pub use rpc::*;
pub use strand::*;

#[macro_use]
extern crate log;
