use imgref::ImgVec;
use rgb::RGBA8;

/// Spreads the quantization error of one pixel onto its unprocessed neighbors.
///
/// Called once per pixel, in raster order, after the pixel at `(x, y)` was matched.
/// `scale` is the configured dither scale in `0.0..=1.0`.
pub trait Dither {
    fn diffuse(
        &self,
        image: &mut ImgVec<RGBA8>,
        x: usize,
        y: usize,
        source: RGBA8,
        matched: RGBA8,
        scale: f32,
    );

    /// Same as [`Dither::diffuse`] with the alpha error dropped, for palettes whose
    /// entries carry no partial alpha.
    fn diffuse_rgb(
        &self,
        image: &mut ImgVec<RGBA8>,
        x: usize,
        y: usize,
        source: RGBA8,
        matched: RGBA8,
        scale: f32,
    ) {
        let matched = RGBA8 { a: source.a, ..matched };
        self.diffuse(image, x, y, source, matched, scale);
    }
}

/// One kernel tap: neighbor offset and the share of error it receives.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tap {
    pub dx: isize,
    pub dy: usize,
    pub weight: f32,
}

const fn tap(dx: isize, dy: usize, weight: f32) -> Tap {
    Tap { dx, dy, weight }
}

const FLOYD_STEINBERG: [Tap; 4] = [
    tap(1, 0, 7.0 / 16.0),
    tap(-1, 1, 3.0 / 16.0),
    tap(0, 1, 5.0 / 16.0),
    tap(1, 1, 1.0 / 16.0),
];

// Only 6/8 of the error is propagated.
const ATKINSON: [Tap; 6] = [
    tap(1, 0, 1.0 / 8.0),
    tap(2, 0, 1.0 / 8.0),
    tap(-1, 1, 1.0 / 8.0),
    tap(0, 1, 1.0 / 8.0),
    tap(1, 1, 1.0 / 8.0),
    tap(0, 2, 1.0 / 8.0),
];

const SIERRA_LITE: [Tap; 3] = [tap(1, 0, 2.0 / 4.0), tap(-1, 1, 1.0 / 4.0), tap(0, 1, 1.0 / 4.0)];

/// Error diffusion kernels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorDiffusion {
    /// Right 7/16, bottom-left 3/16, bottom 5/16, bottom-right 1/16.
    FloydSteinberg,
    Atkinson,
    SierraLite,
}

impl ErrorDiffusion {
    pub fn kernel(self) -> &'static [Tap] {
        match self {
            Self::FloydSteinberg => &FLOYD_STEINBERG,
            Self::Atkinson => &ATKINSON,
            Self::SierraLite => &SIERRA_LITE,
        }
    }
}

impl Dither for ErrorDiffusion {
    fn diffuse(
        &self,
        image: &mut ImgVec<RGBA8>,
        x: usize,
        y: usize,
        source: RGBA8,
        matched: RGBA8,
        scale: f32,
    ) {
        if scale <= 0.0 || source == matched {
            return;
        }

        let err = [
            (source.r as f32 - matched.r as f32) * scale,
            (source.g as f32 - matched.g as f32) * scale,
            (source.b as f32 - matched.b as f32) * scale,
            (source.a as f32 - matched.a as f32) * scale,
        ];

        let width = image.width();
        let height = image.height();
        let stride = image.stride();
        let buf = image.buf_mut();

        for t in self.kernel() {
            let Some(nx) = x.checked_add_signed(t.dx) else {
                continue;
            };
            let ny = y + t.dy;
            if nx >= width || ny >= height {
                continue;
            }
            let p = &mut buf[ny * stride + nx];
            // Fully transparent pixels keep their value.
            if p.a == 0 {
                continue;
            }
            let spread = |c: u8, e: f32| (c as f32 + e * t.weight).round().clamp(0.0, 255.0) as u8;
            p.r = spread(p.r, err[0]);
            p.g = spread(p.g, err[1]);
            p.b = spread(p.b, err[2]);
            p.a = spread(p.a, err[3]);
        }
    }
}
