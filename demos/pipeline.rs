use pipeline_hll::{AsPipeline, PipelineConfig, Sketch};

fn main() {
    let mut sketch = Sketch::<4, 6>::new().with_count(2);
    sketch.set_register(3, 5);
    sketch.set_register(10, 12);

    let config = PipelineConfig::default();
    let explicit = sketch.as_pipeline(&config).unwrap();
    println!("explicit = {:02x?}", &explicit[..]);

    let dense = sketch
        .as_pipeline(&config.with_always_write_dense(true))
        .unwrap();
    println!("dense = {:02x?}", &dense[..]);

    let mut sink = Vec::new();
    let written = sketch
        .write_pipeline(&config.with_write_dirty_encoding(true), &mut sink)
        .unwrap();
    println!("dirty explicit = {:02x?} ({} bytes)", sink, written);
}
