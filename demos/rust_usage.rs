use anyhow::Result;
use arrow_array::{Int32Array, RecordBatch};
use arrow_schema::{DataType, Field, Schema};
use gpu_column_engine::interop::{gpu_columns_to_record_batch, record_batch_to_gpu_columns, SchemaExt};
use gpu_column_engine::{allocate_like, copy, empty_like, Column, CopyEngine, DType, Device, MemoryConfig, TypeMetadata};
use std::sync::Arc;
use tracing::{info, Level};

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .init();

    info!("Device columns - Rust Examples");

    // Example 1: Shape, allocation and duplication of one column
    column_primitives_example()?;

    // Example 2: Arrow record batches through the device
    arrow_round_trip_example()?;

    // Example 3: Memory pool configuration
    memory_config_example()?;

    // Example 4: Error reporting
    error_handling_example()?;

    Ok(())
}

fn column_primitives_example() -> Result<()> {
    info!("=== Example 1: empty_like / allocate_like / copy ===");

    let device = Device::host(MemoryConfig::default())?;
    let stream = device.create_stream()?;

    let values: Vec<u8> = [7i32, -1, 42, 0, 9].iter().flat_map(|v| v.to_le_bytes()).collect();
    let input = Column::from_host(
        &device,
        stream,
        DType::Int32,
        TypeMetadata::default(),
        &values,
        Some(&[true, false, true, true, false]),
    )?;

    let shape = empty_like(&input)?;
    info!("empty_like: {} x {}", shape.size(), shape.dtype());

    let scratch = allocate_like(&input, &device, stream)?;
    info!(
        "allocate_like: {} data bytes, {} validity bytes",
        scratch.data_bytes()?,
        scratch.validity_bytes()
    );

    let duplicate = copy(&input, &device, stream)?;
    device.synchronize(stream)?;

    let host = duplicate.to_host(&device, stream)?;
    info!("copy: {} bytes, validity {:?}", host.data.len(), host.valid);

    Ok(())
}

fn arrow_round_trip_example() -> Result<()> {
    info!("=== Example 2: Arrow round trip ===");

    let device = Device::host(MemoryConfig::default())?;
    let stream = device.create_stream()?;

    let schema = Arc::new(Schema::new(vec![Field::new("id", DataType::Int32, true)]));
    let ids = Arc::new(Int32Array::from(vec![Some(1), None, Some(3)]));
    let batch = RecordBatch::try_new(schema.clone(), vec![ids])?;

    info!("Schema needs {} device bytes for {} rows", schema.device_bytes(batch.num_rows())?, batch.num_rows());

    let columns = record_batch_to_gpu_columns(&batch, &device, stream)?;
    let copies = columns
        .iter()
        .map(|c| copy(c, &device, stream))
        .collect::<Result<Vec<_>, _>>()?;

    let back = gpu_columns_to_record_batch(&copies, schema, &device, stream)?;
    info!("Round trip returned {} rows, equal: {}", back.num_rows(), back == batch);

    Ok(())
}

fn memory_config_example() -> Result<()> {
    info!("=== Example 3: Memory Configuration ===");

    // Configure for specific hardware
    let config = MemoryConfig::default()
        // Limit device memory usage
        .with_memory_limit(4 * 1024 * 1024 * 1024) // 4GB
        // Fewer, larger size classes
        .with_slab_sizes(vec![4 * 1024, 256 * 1024, 16 * 1024 * 1024])
        .with_max_slabs_per_class(256);

    info!("Pool configured with:");
    info!("  Memory limit: {} GB", config.memory_limit / (1024 * 1024 * 1024));
    info!("  Slab sizes: {:?}", config.slab_sizes);
    info!("  Max slabs per class: {}", config.max_slabs_per_class);

    let device = Device::host(config)?;
    let stream = device.create_stream()?;
    let column = Column::from_host(&device, stream, DType::Float64, TypeMetadata::default(), &[0u8; 8 * 1000], None)?;
    drop(column);

    info!("Pool after release: {:?}", device.stats());
    info!("Trimmed {} bytes", device.trim()?);

    Ok(())
}

fn error_handling_example() -> Result<()> {
    info!("=== Example 4: Error Reporting ===");

    let device = Device::host(MemoryConfig::default().with_memory_limit(1024))?;
    let stream = device.create_stream()?;

    // A non-empty column without data is malformed
    let broken = Column::from_parts(3, None, None, 0, DType::Int32, TypeMetadata::default());
    match copy(&broken, &device, stream) {
        Ok(_) => {}
        Err(e) => info!("Expected error: {}", e),
    }

    // The pool refuses requests beyond its limit
    match Column::from_host(&device, stream, DType::Int64, TypeMetadata::default(), &[0u8; 8 * 4096], None) {
        Ok(_) => {}
        Err(e) => info!("Expected allocation error: {}", e),
    }

    Ok(())
}
