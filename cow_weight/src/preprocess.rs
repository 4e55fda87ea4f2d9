//! Turns raw image bytes into the fixed-shape tensor the weight model expects.
//!
//! The model was trained on photos squashed to 128x128, so the resize never
//! preserves aspect ratio. Values are laid out NHWC: batch, row, column, then
//! the red, green and blue channels scaled to `[0, 1]`.

use image::{ImageReader, Rgb, RgbImage};
use ndarray::{Array, Ix4};
use std::io::Cursor;
use thiserror::Error;

pub const INPUT_SIZE: u32 = 128;
pub const INPUT_CHANNELS: usize = 3;
pub const INPUT_SHAPE: [usize; 4] = [1, INPUT_SIZE as usize, INPUT_SIZE as usize, INPUT_CHANNELS];
pub const INPUT_LEN: usize = INPUT_SIZE as usize * INPUT_SIZE as usize * INPUT_CHANNELS;

pub type InputTensor = Array<f32, Ix4>;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("image data is empty")]
    Empty,
    #[error("failed to read image data: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to decode image: {0}")]
    Image(#[from] image::ImageError),
    #[error("decoded image has no pixels ({0}x{1})")]
    NoPixels(u32, u32),
}

pub fn preprocess(image_data: &[u8]) -> Result<InputTensor, DecodeError> {
    let img = decode(image_data)?;
    tracing::debug!(
        width = img.width(),
        height = img.height(),
        "Decoded image, resizing to {}x{}",
        INPUT_SIZE,
        INPUT_SIZE
    );

    let resized = resize_average(&img, INPUT_SIZE, INPUT_SIZE);
    Ok(to_input_tensor(&resized))
}

/// Decodes any format `image` can guess from the bytes. Alpha is dropped.
pub fn decode(image_data: &[u8]) -> Result<RgbImage, DecodeError> {
    if image_data.is_empty() {
        return Err(DecodeError::Empty);
    }

    let image_reader = ImageReader::new(Cursor::new(image_data)).with_guessed_format()?;
    let img = image_reader.decode()?.to_rgb8();

    if img.width() == 0 || img.height() == 0 {
        return Err(DecodeError::NoPixels(img.width(), img.height()));
    }

    Ok(img)
}

/// Box-filter resize to exactly `width` x `height`.
///
/// Every destination pixel is the rounded mean of the source block it covers.
/// When upscaling a block shrinks to the single nearest source pixel.
pub fn resize_average(img: &RgbImage, width: u32, height: u32) -> RgbImage {
    let (src_width, src_height) = img.dimensions();
    let columns: Vec<(u32, u32)> = (0..width)
        .map(|x| source_span(x, width, src_width))
        .collect();
    let rows: Vec<(u32, u32)> = (0..height)
        .map(|y| source_span(y, height, src_height))
        .collect();

    RgbImage::from_fn(width, height, |x, y| {
        let (x0, x1) = columns[x as usize];
        let (y0, y1) = rows[y as usize];

        let mut sum = [0u64; 3];
        for sy in y0..y1 {
            for sx in x0..x1 {
                let Rgb(channels) = img.get_pixel(sx, sy);
                for (acc, value) in sum.iter_mut().zip(channels) {
                    *acc += *value as u64;
                }
            }
        }

        let count = ((x1 - x0) * (y1 - y0)) as u64;
        Rgb(sum.map(|total| ((total + count / 2) / count) as u8))
    })
}

// Half-open source range covered by destination index `dst`; never empty.
fn source_span(dst: u32, dst_len: u32, src_len: u32) -> (u32, u32) {
    let src = src_len as u64;
    let start = (dst as u64 * src / dst_len as u64) as u32;
    let end = ((dst as u64 + 1) * src / dst_len as u64) as u32;

    let start = start.min(src_len.saturating_sub(1));
    (start, end.max(start + 1).min(src_len))
}

pub fn to_input_tensor(img: &RgbImage) -> InputTensor {
    let (width, height) = img.dimensions();
    let mut input = Array::zeros((1, height as usize, width as usize, INPUT_CHANNELS));

    for (x, y, pixel) in img.enumerate_pixels() {
        let x = x as usize;
        let y = y as usize;
        let [r, g, b] = pixel.0;
        input[[0, y, x, 0]] = (r as f32) / 255.;
        input[[0, y, x, 1]] = (g as f32) / 255.;
        input[[0, y, x, 2]] = (b as f32) / 255.;
    }

    input
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, ImageFormat, Rgba};

    fn encode_png(img: &RgbImage) -> Vec<u8> {
        let mut image_data: Vec<u8> = Vec::new();
        let mut cursor = Cursor::new(&mut image_data);
        img.write_to(&mut cursor, ImageFormat::Png).unwrap();
        image_data
    }

    fn gradient(width: u32, height: u32) -> RgbImage {
        ImageBuffer::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
        })
    }

    #[test]
    fn test_solid_red_image() {
        let img = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_pixel(128, 128, Rgb([255, 0, 0]));
        let input = preprocess(&encode_png(&img)).unwrap();

        assert_eq!(input.shape(), &INPUT_SHAPE);
        let values = input.as_slice().unwrap();
        for pixel in values.chunks(3) {
            assert_eq!(pixel, &[1.0f32, 0.0, 0.0]);
        }
    }

    #[test]
    fn test_arbitrary_sizes_produce_fixed_tensor() {
        for (width, height) in [(300, 200), (1, 1), (7, 513), (128, 64), (1024, 768)] {
            let input = preprocess(&encode_png(&gradient(width, height))).unwrap();

            assert_eq!(input.shape(), &INPUT_SHAPE);
            assert_eq!(input.len(), INPUT_LEN);
            assert!(input.iter().all(|v| (0.0..=1.0).contains(v)));
        }
    }

    #[test]
    fn test_preprocess_is_deterministic() {
        let image_data = encode_png(&gradient(300, 200));

        let first = preprocess(&image_data).unwrap();
        let second = preprocess(&image_data).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn test_channel_order_and_layout() {
        let mut img = RgbImage::from_pixel(128, 128, Rgb([0, 0, 0]));
        img.put_pixel(5, 2, Rgb([255, 51, 102]));

        let input = to_input_tensor(&img);
        let values = input.as_slice().unwrap();
        let offset = (2 * 128 + 5) * 3;

        assert_eq!(input[[0, 2, 5, 0]], 1.0);
        assert_eq!(&values[offset..offset + 3], &[1.0f32, 0.2, 0.4]);
    }

    #[test]
    fn test_resize_does_not_preserve_aspect_ratio() {
        let img = RgbImage::from_fn(256, 128, |x, _| {
            if x < 128 {
                Rgb([255, 0, 0])
            } else {
                Rgb([0, 0, 255])
            }
        });

        let resized = resize_average(&img, 128, 128);

        assert_eq!(resized.dimensions(), (128, 128));
        assert_eq!(resized.get_pixel(0, 0), &Rgb([255, 0, 0]));
        assert_eq!(resized.get_pixel(63, 127), &Rgb([255, 0, 0]));
        assert_eq!(resized.get_pixel(64, 0), &Rgb([0, 0, 255]));
        assert_eq!(resized.get_pixel(127, 127), &Rgb([0, 0, 255]));
    }

    #[test]
    fn test_resize_averages_blocks() {
        let img = RgbImage::from_fn(2, 2, |x, y| {
            let v = ((y * 2 + x) * 10) as u8;
            Rgb([v, 255 - v, 0])
        });
        let resized = resize_average(&img, 1, 1);
        // (0 + 10 + 20 + 30) / 4
        assert_eq!(resized.get_pixel(0, 0), &Rgb([15, 240, 0]));

        let img = RgbImage::from_fn(2, 1, |x, _| Rgb([(x * 255) as u8, 0, 0]));
        assert_eq!(resize_average(&img, 1, 1).get_pixel(0, 0), &Rgb([128, 0, 0]));
    }

    #[test]
    fn test_resize_upscales_by_repetition() {
        let img = RgbImage::from_fn(2, 2, |x, y| Rgb([(x * 200) as u8, (y * 100) as u8, 7]));

        let resized = resize_average(&img, 4, 4);

        assert_eq!(resized.get_pixel(1, 1), &Rgb([0, 0, 7]));
        assert_eq!(resized.get_pixel(2, 1), &Rgb([200, 0, 7]));
        assert_eq!(resized.get_pixel(3, 3), &Rgb([200, 100, 7]));
    }

    #[test]
    fn test_alpha_is_dropped() {
        let img = ImageBuffer::<Rgba<u8>, Vec<u8>>::from_pixel(10, 10, Rgba([0, 255, 0, 0]));
        let mut image_data: Vec<u8> = Vec::new();
        img.write_to(&mut Cursor::new(&mut image_data), ImageFormat::Png)
            .unwrap();

        let input = preprocess(&image_data).unwrap();

        assert_eq!(&input.as_slice().unwrap()[..3], &[0.0f32, 1.0, 0.0]);
    }

    #[test]
    fn test_empty_bytes_fail() {
        assert!(matches!(preprocess(&[]), Err(DecodeError::Empty)));
    }

    #[test]
    fn test_garbage_bytes_fail() {
        let result = preprocess(b"definitely not an image");

        assert!(matches!(result, Err(DecodeError::Image(_))));
    }
}
