//! Power-of-two downscaling for oversized textures.

use super::Texel;

/// Downscale an interleaved pixel buffer by a power-of-two factor.
///
/// `scale` must be `0.5^k` for some `k >= 0`; the buffer is halved `k` times
/// with a box filter, averaging 2x2 blocks (2x2x2 for volumes) in float and
/// casting back to storage. Dimensions of 1 are left alone, so the result
/// never collapses below 1 in any axis.
///
/// Returns the scaled buffer and its dimensions.
pub fn resize_pixels<S: Texel>(
    pixels: &[S],
    width: usize,
    height: usize,
    depth: usize,
    channels: usize,
    scale: f32,
) -> (Vec<S>, usize, usize, usize) {
    debug_assert_eq!(pixels.len(), width * height * depth.max(1) * channels);

    let mut current = pixels.to_vec();
    let (mut w, mut h, mut d) = (width, height, depth.max(1));

    let mut s = scale;
    while s < 1.0 && (w > 1 || h > 1 || d > 1) {
        let (halved, nw, nh, nd) = halve_box(&current, w, h, d, channels);
        current = halved;
        w = nw;
        h = nh;
        d = nd;
        s *= 2.0;
    }

    (current, w, h, d)
}

fn halve_box<S: Texel>(
    pixels: &[S],
    width: usize,
    height: usize,
    depth: usize,
    channels: usize,
) -> (Vec<S>, usize, usize, usize) {
    let nw = (width / 2).max(1);
    let nh = (height / 2).max(1);
    let nd = (depth / 2).max(1);

    let mut out = Vec::with_capacity(nw * nh * nd * channels);
    let mut sum = vec![0.0f32; channels];

    for z in 0..nd {
        for y in 0..nh {
            for x in 0..nw {
                sum.fill(0.0);
                let mut count = 0u32;

                // Clamp so odd trailing rows/columns still contribute.
                for dz in 0..2 {
                    for dy in 0..2 {
                        for dx in 0..2 {
                            let sz = (z * 2 + dz).min(depth - 1);
                            let sy = (y * 2 + dy).min(height - 1);
                            let sx = (x * 2 + dx).min(width - 1);
                            let src = ((sz * height + sy) * width + sx) * channels;
                            for c in 0..channels {
                                sum[c] += pixels[src + c].to_f32();
                            }
                            count += 1;
                        }
                    }
                }

                for c in 0..channels {
                    out.push(S::from_f32(sum[c] / count as f32));
                }
            }
        }
    }

    (out, nw, nh, nd)
}
