#![allow(dead_code)]

use crud_framework::ResourceConfig;
use crud_sample::lifecycle::SampleSystem;

pub const BASE_URI: &str = "/api/v1/sample";

pub fn config() -> ResourceConfig {
    ResourceConfig::for_domain("sample")
}

pub fn start() -> SampleSystem {
    SampleSystem::new(config())
}
