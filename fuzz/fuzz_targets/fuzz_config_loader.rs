#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    // Parse errors and validation errors are fine; panics are not.
    if let Ok(cfg) = bench_config::load_toml(data)
        && cfg.validate().is_ok()
    {
        let _ = bench_core::config::BenchCfg::from(&cfg);
    }
});
