use rand::distr::{Alphanumeric, SampleString};

pub mod chunk;

pub mod event;

pub mod execution;

pub mod item;

pub mod job;

pub mod launcher;

pub mod parameters;

pub mod step;

/// Generates a random alphanumeric name, used for anonymous flow elements.
fn build_name() -> String {
    Alphanumeric.sample_string(&mut rand::rng(), 8)
}
