#![no_main]

use libfuzzer_sys::fuzz_target;
use pipeline_hll::{AsPipeline, PipelineConfig, PipelineSource, Sketch};
use wyhash::wyhash;

fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }

    let h = wyhash(data, 0);
    let config = PipelineConfig::default()
        .with_always_write_dense(h & 1 == 1)
        .with_write_dirty_encoding(h & 2 == 2)
        .with_max_explicit_registers((h >> 8) as usize % 1024);

    let mut sketch = Sketch::<10, 6>::new().with_count(h);
    for chunk in data.chunks_exact(3) {
        let idx = u32::from(u16::from_le_bytes([chunk[0], chunk[1]])) % 1024;
        sketch.set_register(idx, chunk[2]);
    }

    let bytes = sketch.as_pipeline(&config).unwrap();
    let payload_len = u32::from_le_bytes(bytes[16..20].try_into().unwrap()) as usize;
    assert_eq!(bytes.len(), 20 + payload_len);
    assert_eq!(u64::from_le_bytes(bytes[4..12].try_into().unwrap()), sketch.count());
    assert_eq!(bytes[12], 10);

    let explicit = sketch.len() <= config.max_explicit_registers && !config.always_write_dense;
    if explicit {
        assert_eq!(bytes[0].to_ascii_uppercase(), b'E');
        assert_eq!(payload_len, sketch.len() * 4);
    } else {
        assert_eq!(bytes[0].to_ascii_uppercase(), b'D');
        assert_eq!(payload_len, 769);
    }

    sketch.to_dense();
    let dense = sketch.as_pipeline(&config).unwrap();
    assert_eq!(dense.len(), 20 + 769);
});
