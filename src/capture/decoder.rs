use jpeg_decoder::{Decoder, PixelFormat as JpegPixelFormat};

use crate::error::ReadError;

/// Formats negotiated with the device. Frames leave the decoder as BGR24.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Yuyv4,
    Mjpeg,
}

/// Decode a raw device buffer into packed BGR24.
pub fn decode_frame(
    data: &[u8],
    format: PixelFormat,
    width: u32,
    height: u32,
) -> Result<(u32, u32, Vec<u8>), ReadError> {
    match format {
        PixelFormat::Mjpeg => decode_mjpeg(data),
        PixelFormat::Yuyv4 => Ok((width, height, yuyv_to_bgr(data, width, height)?)),
    }
}

fn decode_mjpeg(data: &[u8]) -> Result<(u32, u32, Vec<u8>), ReadError> {
    let mut decoder = Decoder::new(data);
    let mut pixels = decoder
        .decode()
        .map_err(|e| ReadError::Malformed(e.to_string()))?;
    let info = decoder
        .info()
        .ok_or_else(|| ReadError::Malformed("jpeg without header".into()))?;

    let bgr = match info.pixel_format {
        JpegPixelFormat::RGB24 => {
            for px in pixels.chunks_exact_mut(3) {
                px.swap(0, 2);
            }
            pixels
        }
        JpegPixelFormat::L8 => pixels.iter().flat_map(|&l| [l, l, l]).collect(),
        other => {
            return Err(ReadError::Malformed(format!(
                "unsupported jpeg pixel format {:?}",
                other
            )))
        }
    };

    Ok((info.width as u32, info.height as u32, bgr))
}

/// BT.601 limited-range YUYV (YUY2) to BGR.
pub fn yuyv_to_bgr(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>, ReadError> {
    let pixels = width as usize * height as usize;
    if width % 2 != 0 || data.len() < pixels * 2 {
        return Err(ReadError::Malformed(format!(
            "{} bytes for {}x{} YUYV",
            data.len(),
            width,
            height
        )));
    }

    let mut out = Vec::with_capacity(pixels * 3);
    for quad in data[..pixels * 2].chunks_exact(4) {
        let u = quad[1] as i32 - 128;
        let v = quad[3] as i32 - 128;
        for y in [quad[0], quad[2]] {
            let c = 298 * (y as i32 - 16);
            let b = (c + 516 * u + 128) >> 8;
            let g = (c - 100 * u - 208 * v + 128) >> 8;
            let r = (c + 409 * v + 128) >> 8;
            out.extend_from_slice(&[clamp(b), clamp(g), clamp(r)]);
        }
    }

    Ok(out)
}

fn clamp(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yuyv_grey_maps_to_grey() {
        // Y=126 with neutral chroma is mid grey in limited range
        let data = [126u8, 128, 126, 128];
        let bgr = yuyv_to_bgr(&data, 2, 1).unwrap();
        assert_eq!(bgr.len(), 6);
        assert!(bgr.iter().all(|&c| (127..=129).contains(&c)));
    }

    #[test]
    fn yuyv_rejects_odd_width() {
        assert!(yuyv_to_bgr(&[0u8; 6], 3, 1).is_err());
    }

    #[test]
    fn garbage_jpeg_is_malformed() {
        let err = decode_frame(&[0u8; 16], PixelFormat::Mjpeg, 4, 4).unwrap_err();
        assert!(err.is_transient());
    }
}
