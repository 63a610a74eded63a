//! Input tensor preparation

use serde::{Deserialize, Serialize};

/// Memory layout the model expects for image input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputLayout {
    /// Channels first, matching the planar dataset layout
    #[default]
    Nchw,
    /// Channels last (interleaved RGB)
    Nhwc,
}

/// Normalize planar RGB bytes into `out` using the requested layout
pub(crate) fn fill_input(pixels: &[u8], layout: InputLayout, scale: f32, out: &mut Vec<f32>) {
    out.clear();
    out.reserve(pixels.len());

    match layout {
        InputLayout::Nchw => out.extend(pixels.iter().map(|&p| p as f32 / scale)),
        InputLayout::Nhwc => {
            let plane = pixels.len() / 3;
            for i in 0..plane {
                for c in 0..3 {
                    out.push(pixels[c * plane + i] as f32 / scale);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nchw_keeps_planes() {
        let mut out = Vec::new();
        fill_input(&[0, 255, 51, 102], InputLayout::Nchw, 255.0, &mut out);
        assert_eq!(out, vec![0.0, 1.0, 0.2, 0.4]);
    }

    #[test]
    fn test_nhwc_interleaves() {
        // Two pixels: R=[1,2] G=[3,4] B=[5,6]
        let mut out = Vec::new();
        fill_input(&[1, 2, 3, 4, 5, 6], InputLayout::Nhwc, 1.0, &mut out);
        assert_eq!(out, vec![1.0, 3.0, 5.0, 2.0, 4.0, 6.0]);
    }

    #[test]
    fn test_buffer_reused() {
        let mut out = vec![9.0; 10];
        fill_input(&[10, 20], InputLayout::Nchw, 10.0, &mut out);
        assert_eq!(out, vec![1.0, 2.0]);
    }
}
