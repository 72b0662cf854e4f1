/// HTTP probe of the monitored endpoint
pub mod client;

pub use client::{Probe, ProbeClient, PAYLOAD_EVENT_TYPES};
