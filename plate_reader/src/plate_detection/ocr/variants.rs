use opencv::core::mean;
use opencv::core::Size;
use opencv::core::BORDER_DEFAULT;
use opencv::core::CV_8U;
use opencv::imgproc::adaptive_threshold;
use opencv::imgproc::create_clahe;
use opencv::imgproc::gaussian_blur;
use opencv::imgproc::resize;
use opencv::imgproc::threshold;
use opencv::imgproc::ADAPTIVE_THRESH_GAUSSIAN_C;
use opencv::imgproc::INTER_LANCZOS4;
use opencv::imgproc::THRESH_BINARY;
use opencv::imgproc::THRESH_OTSU;
use opencv::prelude::*;

use super::VariantKind;
use crate::config::OcrConfig;
use crate::error::Result;
use crate::plate_detection::to_gray;

pub struct OcrVariant {
    pub kind: VariantKind,
    pub image: Mat,
}

/// The four enhancement variants, in trial order.
pub fn build_variants(image: &Mat, config: &OcrConfig) -> Result<Vec<OcrVariant>> {
    let enhanced = enhance(image, config)?;

    let mut blurred = Mat::default();
    gaussian_blur(
        &enhanced,
        &mut blurred,
        Size::new(config.blur_kernel, config.blur_kernel),
        0.0,
        0.0,
        BORDER_DEFAULT,
    )?;

    let mut otsu = Mat::default();
    threshold(&blurred, &mut otsu, 0.0, 255.0, THRESH_BINARY | THRESH_OTSU)?;

    let mut adaptive = Mat::default();
    adaptive_threshold(
        &blurred,
        &mut adaptive,
        255.0,
        ADAPTIVE_THRESH_GAUSSIAN_C,
        THRESH_BINARY,
        config.adaptive_block_size,
        config.adaptive_c,
    )?;

    let mut clahe = create_clahe(
        config.clahe_clip_limit,
        Size::new(config.clahe_tile_grid, config.clahe_tile_grid),
    )?;
    let mut equalized = Mat::default();
    clahe.apply(&blurred, &mut equalized)?;
    let mut clahe_otsu = Mat::default();
    threshold(
        &equalized,
        &mut clahe_otsu,
        0.0,
        255.0,
        THRESH_BINARY | THRESH_OTSU,
    )?;

    Ok(vec![
        OcrVariant {
            kind: VariantKind::Otsu,
            image: otsu,
        },
        OcrVariant {
            kind: VariantKind::AdaptiveGaussian,
            image: adaptive,
        },
        OcrVariant {
            kind: VariantKind::ClaheOtsu,
            image: clahe_otsu,
        },
        OcrVariant {
            kind: VariantKind::Enhanced,
            image: enhanced,
        },
    ])
}

/// Grayscale, contrast stretched around the mean, upscaled when narrow.
pub fn enhance(image: &Mat, config: &OcrConfig) -> Result<Mat> {
    let gray = to_gray(image)?;

    let mean_level = mean(&gray, &Mat::default())?[0].round();
    let factor = config.contrast_factor;
    let mut contrasted = Mat::default();
    gray.convert_to(&mut contrasted, CV_8U, factor, (1.0 - factor) * mean_level)?;

    let width = contrasted.cols();
    if width >= config.min_width {
        return Ok(contrasted);
    }
    let ratio = config.min_width as f64 / width as f64;
    let size = Size::new(
        (width as f64 * ratio) as i32,
        (contrasted.rows() as f64 * ratio) as i32,
    );
    let mut upscaled = Mat::default();
    resize(&contrasted, &mut upscaled, size, 0.0, 0.0, INTER_LANCZOS4)?;
    Ok(upscaled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencv::core::{Rect, Scalar, CV_8UC1, CV_8UC3};
    use opencv::imgproc::{rectangle, FILLED, LINE_8};

    fn small_plate() -> Mat {
        let mut image =
            Mat::new_rows_cols_with_default(30, 100, CV_8UC3, Scalar::all(200.0)).unwrap();
        for i in 0..6 {
            let stroke = Rect::new(10 + i * 14, 8, 6, 14);
            rectangle(&mut image, stroke, Scalar::all(30.0), FILLED, LINE_8, 0).unwrap();
        }
        image
    }

    #[test]
    fn four_variants_in_order() {
        let variants = build_variants(&small_plate(), &OcrConfig::default()).unwrap();
        let kinds: Vec<VariantKind> = variants.iter().map(|v| v.kind).collect();
        assert_eq!(
            kinds,
            vec![
                VariantKind::Otsu,
                VariantKind::AdaptiveGaussian,
                VariantKind::ClaheOtsu,
                VariantKind::Enhanced,
            ]
        );
        for variant in &variants {
            assert_eq!(variant.image.typ(), CV_8UC1);
            assert_eq!(variant.image.cols(), 200);
            assert_eq!(variant.image.rows(), 60);
        }
    }

    #[test]
    fn wide_crops_keep_their_size() {
        let image = Mat::new_rows_cols_with_default(50, 260, CV_8UC1, Scalar::all(90.0)).unwrap();
        let enhanced = enhance(&image, &OcrConfig::default()).unwrap();
        assert_eq!(enhanced.cols(), 260);
        assert_eq!(enhanced.rows(), 50);
    }

    #[test]
    fn contrast_is_stretched_around_the_mean() {
        let mut image =
            Mat::new_rows_cols_with_default(20, 300, CV_8UC1, Scalar::all(100.0)).unwrap();
        rectangle(
            &mut image,
            Rect::new(0, 0, 150, 20),
            Scalar::all(140.0),
            FILLED,
            LINE_8,
            0,
        )
        .unwrap();
        let enhanced = enhance(&image, &OcrConfig::default()).unwrap();
        // Mean is 120: 140 maps to 160 and 100 maps to 80.
        assert_eq!(*enhanced.at_2d::<u8>(0, 0).unwrap(), 160);
        assert_eq!(*enhanced.at_2d::<u8>(0, 299).unwrap(), 80);
    }
}
