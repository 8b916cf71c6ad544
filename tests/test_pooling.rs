// Integration tests for max pooling: variant agreement, remainder policy and
// error routing through the pooling layer.

use convnet_engine::layers::{Layer, PoolingLayer};
use convnet_engine::pooling::{
    instance, instance_for_test, instance_specific, PoolingBackprop, PoolingShape,
    POOLING_VARIANTS,
};
use convnet_engine::utils::SimpleRng;
use convnet_engine::Device;

fn random_input(len: usize, seed: u64) -> Vec<f32> {
    let mut rng = SimpleRng::new(seed);
    let mut input = vec![0.0; len];
    rng.fill_uniform(&mut input, -1.0, 1.0);
    input
}

#[test]
fn test_variants_agree() {
    let _ = env_logger::builder().is_test(true).try_init();
    let device = Device::cpu();
    for &(planes, board, pool, batch) in &[(3, 8, 2, 4), (2, 9, 3, 2), (4, 7, 2, 3), (1, 5, 5, 1)] {
        let input = random_input(batch * planes * board * board, (board * pool) as u64);
        let reference = instance_for_test(&device, planes, board, pool)
            .unwrap()
            .propagate(batch, &input)
            .unwrap();
        for index in 0..POOLING_VARIANTS {
            let out = instance_specific(index, &device, planes, board, pool)
                .unwrap()
                .propagate(batch, &input)
                .unwrap();
            assert_eq!(out, reference, "variant {} on {}x{} by {}", index, board, board, pool);
        }
    }
}

#[test]
fn test_instance_uses_device_buffers() {
    let device = Device::cpu();
    let pool = instance(&device, 1, 4, 2).unwrap();
    let input = device.upload(&[
        1.0, 0.0, 0.0, 0.0, //
        0.0, 0.0, 0.0, 2.0, //
        0.0, 3.0, 0.0, 0.0, //
        0.0, 0.0, 4.0, 0.0,
    ]);
    let mut output = device.create_buffer(4);
    pool.propagate_buffers(1, &input, &mut output).unwrap();
    assert_eq!(output.to_host(), vec![1.0, 2.0, 3.0, 4.0]);
}

#[test]
fn test_floor_divide_ignores_remainder() {
    // 5x5 by 2 pools only the top-left 4x4
    let mut input = vec![-1.0f32; 25];
    for i in 0..5 {
        input[4 * 5 + i] = 50.0;
        input[i * 5 + 4] = 50.0;
    }
    input[0] = 7.0;
    for index in 0..POOLING_VARIANTS {
        let out = instance_specific(index, &Device::cpu(), 1, 5, 2)
            .unwrap()
            .propagate(1, &input)
            .unwrap();
        assert_eq!(out, vec![7.0, -1.0, -1.0, -1.0]);
    }
}

#[test]
fn test_backprop_preserves_error_sum() {
    let shape = PoolingShape::new(3, 7, 2).unwrap();
    let backprop = PoolingBackprop::new(shape);
    let batch = 2;
    let input = random_input(batch * shape.input_cube_size(), 17);
    let errors = random_input(batch * shape.output_cube_size(), 18);

    let selectors = backprop.selectors(batch, &input).unwrap();
    let upstream = backprop.backprop_errors(batch, &errors, &selectors).unwrap();

    let nonzero = upstream.iter().filter(|&&v| v != 0.0).count();
    assert_eq!(nonzero, errors.iter().filter(|&&v| v != 0.0).count());
    let diff: f32 = upstream.iter().sum::<f32>() - errors.iter().sum::<f32>();
    assert!(diff.abs() < 1e-4);
}

#[test]
fn test_layer_routes_errors_to_maxima() {
    let layer = PoolingLayer::new(&Device::cpu(), 2, 4, 2, None).unwrap();
    let batch = 1;
    let input = random_input(layer.input_size(), 31);
    let mut output = vec![0.0; layer.output_size()];
    layer.forward(&input, &mut output, batch).unwrap();

    let errors: Vec<f32> = (1..=layer.output_size()).map(|i| i as f32).collect();
    let mut upstream = vec![0.0; layer.input_size()];
    layer
        .backward(&input, &output, &errors, Some(&mut upstream), batch)
        .unwrap();

    for (i, &up) in upstream.iter().enumerate() {
        if up != 0.0 {
            // every routed error lands on the value that won its window
            let out_index = output.iter().position(|&o| o == input[i]).unwrap();
            assert_eq!(up, errors[out_index]);
        }
    }
    assert_eq!(upstream.iter().filter(|&&v| v != 0.0).count(), layer.output_size());
}
