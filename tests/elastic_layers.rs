//! End-to-end behavior of the quantized layers through the public API.

use elastiq::autograd::{backward, linear, sum, Device};
use elastiq::nn::{
    convert_layer, elastic_layers, quantize_model, set_model_alpha, set_model_beta, Conv2d,
    Conv2dConfig, ElasticLayer, Layer, Linear, LinearQuantLin, LinearQuantLog, Mode, Module,
    QuantConv2dLin, QuantConv2dLog,
};
use elastiq::quant::{lin_proj, GridSpec};
use elastiq::{Error, Tensor};
use rand::rngs::StdRng;
use rand::SeedableRng;

fn snapshot(layer: &Layer) -> Vec<Vec<f32>> {
    layer
        .parameters()
        .iter()
        .map(|p| p.data().iter().copied().collect())
        .collect()
}

fn mixed_model() -> Layer {
    let mut rng = StdRng::seed_from_u64(3);
    let conv = Conv2dConfig::new(1, 1, [1, 1]);
    Layer::sequential(vec![
        LinearQuantLin::linear(2, 2, true, -1.0, 1.0, 5).unwrap().into(),
        LinearQuantLog::geometric(2, 2, false, 2.0, 0.25, 3).unwrap().into(),
        Linear::with_rng(2, 2, true, &mut rng).into(),
        Layer::sequential(vec![
            QuantConv2dLin::linear(conv, -1.0, 1.0, 3).unwrap().into(),
            QuantConv2dLog::geometric(conv, 2.0, 0.5, 2).unwrap().into(),
            Conv2d::with_rng(conv, &mut rng).unwrap().into(),
        ]),
    ])
}

#[test]
fn test_row_projection_scenario() {
    let mut layer = LinearQuantLin::linear(4, 3, true, -1.0, 1.0, 3).unwrap();
    let weight: Vec<f32> = [0.2, -0.9, 0.4, 1.1].iter().copied().cycle().take(12).collect();
    layer.weight_mut().data_mut().as_slice_mut().unwrap().copy_from_slice(&weight);

    let projected = layer.quantized_weight();
    let first_row: Vec<f32> = projected.data().iter().take(4).copied().collect();
    assert_eq!(first_row, vec![0.0, -1.0, 0.0, 1.0]);

    // Eval forward on a one-hot input picks that column of the projected weight
    layer.set_mode(Mode::Eval);
    let x = Tensor::from_shape_vec(&[1, 4], vec![0.0, 0.0, 0.0, 1.0], false).unwrap();
    let y = layer.forward(&x).unwrap();
    assert_eq!(y.data().as_slice().unwrap(), &[1.0, 1.0, 1.0]);
}

#[test]
fn test_model_wide_coefficients_scenario() {
    let mut model = mixed_model();
    let before = snapshot(&model);

    assert_eq!(set_model_alpha(&mut model, 0.5), 4);
    assert_eq!(set_model_beta(&mut model, 0.1), 4);

    let layers = elastic_layers(&model);
    assert_eq!(layers.len(), 4);
    for layer in layers {
        assert_eq!(layer.alpha(), 0.5);
        assert_eq!(layer.beta(), 0.1);
    }
    assert_eq!(snapshot(&model), before);
}

#[test]
fn test_convert_then_eval_matches_projected_donor() {
    let mut rng = StdRng::seed_from_u64(9);
    let donor = Linear::with_rng(3, 2, true, &mut rng);
    let grid = GridSpec::Linear { bottom: -0.5, top: 0.5, size: 9 };

    let mut converted = convert_layer(&Layer::from(donor.clone()), &grid).unwrap();
    assert_eq!(converted.kind(), "LinearQuantLin");
    converted.set_mode(Mode::Eval);

    let x = Tensor::from_shape_vec(&[2, 3], vec![1.0, -2.0, 0.5, 0.25, 0.0, 3.0], false).unwrap();
    let expected = linear(&x, &lin_proj(donor.weight(), -0.5, 0.5, 9), donor.bias()).unwrap();
    assert_eq!(converted.forward(&x).unwrap().data(), expected.data());
}

#[test]
fn test_convert_rejects_wrong_donor() {
    let conv = Layer::from(Conv2d::new(Conv2dConfig::new(1, 1, [3, 3])).unwrap());
    let err = LinearQuantLin::convert(&conv, Default::default()).unwrap_err();
    assert_eq!(err.to_string(), "Expected a Linear ! Received: Conv2d");

    let err = QuantConv2dLog::convert(&Layer::relu(), Default::default()).unwrap_err();
    assert!(matches!(err, Error::TypeMismatch { expected: "Conv2d", .. }));
}

#[test]
fn test_quantized_model_trains_on_accelerator() {
    let mut rng = StdRng::seed_from_u64(17);
    let mut model = Layer::sequential(vec![
        Linear::with_rng(3, 4, true, &mut rng).into(),
        Layer::relu(),
        Linear::with_rng(4, 1, true, &mut rng).into(),
    ]);
    quantize_model(&mut model, &GridSpec::Geometric { gamma: 2.0, init: 0.0625, size: 5 }).unwrap();
    set_model_alpha(&mut model, 0.25);
    model.to_device(Device::Accelerator(1));
    // Coefficients set after the move follow the weights
    set_model_beta(&mut model, 0.01);

    let x = Tensor::from_shape_vec(&[1, 3], vec![0.5, -0.5, 1.0], false)
        .unwrap()
        .to(Device::Accelerator(1));
    let y = model.forward(&x).unwrap();
    assert_eq!(y.device(), Device::Accelerator(1));

    let mut loss = sum(&y);
    backward(&mut loss, None);
    assert!(model.parameters().iter().all(|p| p.grad().is_some()));

    let cpu_input = Tensor::ones(&[1, 3], false);
    assert!(matches!(model.forward(&cpu_input), Err(Error::DeviceMismatch { .. })));
}

#[test]
fn test_conv_shell_set_beta_changes_beta_only() {
    let mut layer = QuantConv2dLog::geometric(Conv2dConfig::new(1, 1, [2, 2]), 2.0, 0.25, 3)
        .unwrap()
        .with_coefficients(0.3, 0.0);
    layer.set_beta(0.7);
    assert_eq!(layer.alpha(), 0.3);
    assert_eq!(layer.beta(), 0.7);
}
