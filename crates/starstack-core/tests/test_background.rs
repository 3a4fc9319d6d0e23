mod common;

use ndarray::Array2;

use starstack_core::background::{self, BackgroundConfig};

#[test]
fn diagonal_gradient_is_removed() {
    let mut data = Array2::from_shape_fn((128, 128), |(r, c)| 10.0 + 0.05 * (r + c) as f32);
    common::add_noise(&mut data, 0.1, 17);

    let config = BackgroundConfig {
        grid: 32,
        sigma: 2.0,
        clip: 0,
    };
    let mut frame = data.clone();
    background::subtract_background(&mut frame, &config);

    // The interior should be flat around zero after subtraction.
    let mut worst = 0.0f32;
    for r in 32..96 {
        for c in 32..96 {
            worst = worst.max(frame[[r, c]].abs());
        }
    }
    assert!(worst < 1.0, "worst interior residual {worst}");
}

#[test]
fn stars_do_not_inflate_the_background() {
    let stars = common::test_star_layout();
    let mut data = common::render_stars(256, 256, &stars, 2.0, 5.0);
    common::add_noise(&mut data, 0.05, 23);

    let config = BackgroundConfig {
        grid: 64,
        sigma: 1.5,
        clip: 0,
    };
    let map = background::extract_background(&data, &config);

    for &v in map.iter() {
        assert!((v - 5.0).abs() < 0.5, "background sample {v}");
    }
}

#[test]
fn brightest_tile_clipping_flattens_hot_cells() {
    // One tile entirely filled with a bright plateau (a big nebula patch).
    let mut data = Array2::from_elem((128, 128), 1.0f32);
    for r in 32..64 {
        for c in 32..64 {
            data[[r, c]] = 50.0;
        }
    }

    let unclipped = background::extract_background(
        &data,
        &BackgroundConfig {
            grid: 32,
            sigma: 10.0,
            clip: 0,
        },
    );
    let clipped = background::extract_background(
        &data,
        &BackgroundConfig {
            grid: 32,
            sigma: 10.0,
            clip: 1,
        },
    );

    assert!(unclipped[[48, 48]] > 25.0);
    assert!(clipped[[48, 48]] < 5.0, "clipped cell {}", clipped[[48, 48]]);
}
