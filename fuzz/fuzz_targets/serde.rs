#![no_main]

use libfuzzer_sys::fuzz_target;
use pipeline_hll::{AsPipeline, PipelineConfig, Sketch};

fuzz_target!(|data: &[u8]| {
    if let Ok(mut sketch) = serde_json::from_slice::<Sketch<10, 6>>(data) {
        sketch.set_register(1, 1);
        assert!(sketch.as_pipeline(&PipelineConfig::default()).is_ok());
    }
});
