//! V4L2 webcam access.
//!
//! Currently, only V4L2 `VIDEO_CAPTURE` devices yielding JFIF JPEG or Motion JPEG frames are
//! supported.

use std::{env, fmt};

use anyhow::bail;
use image::{ImageFormat, RgbaImage};
use linuxvideo::{
    format::{FrameIntervals, FrameSizes, PixFormat, Pixelformat},
    stream::ReadStream,
    BufType, CapabilityFlags, Device, Fract,
};

use crate::{pipeline::FrameSource, timer::Timer};

/// Indicates whether to prefer a higher resolution or frame rate.
///
/// By default, [`ParamPreference::Resolution`] is used, selecting the maximum resolution at the
/// desired frame rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[non_exhaustive]
pub enum ParamPreference {
    /// Prefer increased resolution over higher frame rates.
    #[default]
    Resolution,
    /// Prefer higher frame rate over higher image resolution.
    Framerate,
}

#[derive(Debug, Default, Clone, Copy)]
struct FramePrefs {
    resolution: Option<(u32, u32)>,
    fps: Option<u32>,
    pref: ParamPreference,
}

/// Format negotiation options.
#[derive(Default)]
pub struct WebcamOptions {
    name: Option<String>,
    frame: FramePrefs,
}

impl WebcamOptions {
    /// Sets the name of the webcam device to open.
    ///
    /// If no webcam with the given name can be found, opening the webcam will result in an error.
    #[inline]
    pub fn name(self, name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..self
        }
    }

    /// Sets the minimum desired image resolution.
    ///
    /// A lower resolution might be selected if the webcam cannot deliver the desired resolution.
    #[inline]
    pub fn resolution(mut self, width: u32, height: u32) -> Self {
        self.frame.resolution = Some((width, height));
        self
    }

    /// Sets the desired frame rate.
    ///
    /// A lower frame rate might be selected if the webcam cannot deliver it.
    #[inline]
    pub fn fps(mut self, fps: u32) -> Self {
        self.frame.fps = Some(fps);
        self
    }

    /// Selects whether to prefer a higher resolution or frame rate.
    ///
    /// When the camera cannot deliver the desired frame rate and resolution, this controls which
    /// one is given up first. Otherwise it controls which one is maximized.
    #[inline]
    pub fn prefer(mut self, pref: ParamPreference) -> Self {
        self.frame.pref = pref;
        self
    }
}

#[derive(Clone, Copy, PartialEq)]
struct FrameFormat {
    width: u32,
    height: u32,
    frame_interval: Fract,
}

impl FrameFormat {
    fn num_pixels(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    fn fps(&self) -> f32 {
        1.0 / self.frame_interval.as_f32()
    }
}

impl fmt::Debug for FrameFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{} @ {:.1}Hz", self.width, self.height, self.fps())
    }
}

fn negotiate_format(device: &Device, mut prefs: FramePrefs) -> anyhow::Result<(PixFormat, Fract)> {
    let mut pixel_format = None;
    for format in device.formats(BufType::VIDEO_CAPTURE) {
        let format = format?;
        if format.pixelformat() == Pixelformat::JPEG || format.pixelformat() == Pixelformat::MJPG {
            pixel_format = Some(format.pixelformat());
            break;
        }
    }

    let Some(pixel_format) = pixel_format else {
        bail!("no MJPG or JPEG pixel format offered");
    };

    let mut formats = Vec::new();
    match device.frame_sizes(pixel_format)? {
        FrameSizes::Discrete(sizes) => {
            for size in sizes {
                let intervals =
                    match device.frame_intervals(pixel_format, size.width(), size.height())? {
                        FrameIntervals::Discrete(intervals) => intervals,
                        FrameIntervals::Stepwise(_) | FrameIntervals::Continuous(_) => {
                            bail!("stepwise or continuous frame rates are not supported")
                        }
                    };
                for rate in intervals {
                    formats.push(FrameFormat {
                        width: size.width(),
                        height: size.height(),
                        frame_interval: *rate.fract(),
                    });
                }
            }
        }
        FrameSizes::Stepwise(_) | FrameSizes::Continuous(_) => {
            bail!("stepwise or continuous resolutions are not supported");
        }
    }

    loop {
        if let Some(fmt) = negotiate_format_step(&formats, prefs) {
            return Ok((
                PixFormat::new(fmt.width, fmt.height, pixel_format),
                fmt.frame_interval,
            ));
        }

        log::debug!("failed to negotiate format with prefs {:?}", prefs);
        let relaxed = match prefs.pref {
            ParamPreference::Resolution => {
                prefs.resolution.take().is_some() || prefs.fps.take().is_some()
            }
            ParamPreference::Framerate => {
                prefs.fps.take().is_some() || prefs.resolution.take().is_some()
            }
        };
        if !relaxed {
            break;
        }
        log::debug!("retrying with new prefs {:?}", prefs);
    }

    bail!("failed to negotiate a webcam format")
}

fn negotiate_format_step(formats: &[FrameFormat], prefs: FramePrefs) -> Option<FrameFormat> {
    let mut formats = formats
        .iter()
        .filter(|fmt| {
            prefs
                .resolution
                .map_or(true, |(w, h)| fmt.width >= w && fmt.height >= h)
                && prefs.fps.map_or(true, |fps| fmt.fps().round() >= fps as f32)
        })
        .copied()
        .collect::<Vec<_>>();
    match prefs.pref {
        ParamPreference::Resolution => formats.sort_by(|a, b| {
            a.num_pixels()
                .cmp(&b.num_pixels())
                .then(a.fps().total_cmp(&b.fps()))
        }),
        ParamPreference::Framerate => formats.sort_by(|a, b| {
            a.fps()
                .total_cmp(&b.fps())
                .then(a.num_pixels().cmp(&b.num_pixels()))
        }),
    }
    formats.last().copied()
}

/// Decodes a JPEG camera frame.
///
/// Even good webcams occasionally deliver corrupted MJPG frames. Those are replaced with a blank
/// `width` by `height` image, since skipping them would double the latency of that frame.
fn decode_frame(buf: &[u8], width: u32, height: u32) -> RgbaImage {
    match image::load_from_memory_with_format(buf, ImageFormat::Jpeg) {
        Ok(image) => image.into_rgba8(),
        Err(e) => {
            log::error!("webcam decode error: {}", e);
            RgbaImage::new(width, height)
        }
    }
}

/// A webcam yielding a stream of [`RgbaImage`]s.
pub struct Webcam {
    stream: ReadStream,
    width: u32,
    height: u32,
    t_dequeue: Timer,
    t_decode: Timer,
}

const ENV_VAR_WEBCAM_NAME: &str = "PALMSHOT_WEBCAM_NAME";

impl Webcam {
    /// Opens the first supported webcam found.
    ///
    /// If `PALMSHOT_WEBCAM_NAME` is set and no name was passed in `options`, only the device with
    /// that name is considered.
    ///
    /// This function can block for a significant amount of time while the webcam initializes (on
    /// the order of hundreds of milliseconds).
    pub fn open(options: WebcamOptions) -> anyhow::Result<Self> {
        let name_from_env = env::var(ENV_VAR_WEBCAM_NAME).ok();
        if let Some(name) = &name_from_env {
            log::debug!(
                "webcam override: `{}` is set to '{}'",
                ENV_VAR_WEBCAM_NAME,
                name,
            );
        }
        let name = options.name.as_deref().or(name_from_env.as_deref());

        for res in linuxvideo::list()? {
            match res {
                Ok(dev) => match Self::open_impl(dev, name, options.frame) {
                    Ok(Some(webcam)) => return Ok(webcam),
                    Ok(None) => {}
                    Err(e) => {
                        log::debug!("{}", e);
                    }
                },
                Err(e) => {
                    log::warn!("{}", e);
                }
            }
        }

        match name {
            Some(name) => bail!("no supported webcam named '{}' found", name),
            None => bail!("no supported webcam device found"),
        }
    }

    fn open_impl(
        dev: Device,
        name: Option<&str>,
        prefs: FramePrefs,
    ) -> anyhow::Result<Option<Self>> {
        let caps = dev.capabilities()?;
        if let Some(name) = name {
            if caps.card() != name {
                return Ok(None);
            }
        }

        let cap_flags = caps.device_capabilities();
        let path = dev.path()?;
        log::debug!(
            "device {} ({}) capabilities: {:?}",
            caps.card(),
            path.display(),
            cap_flags,
        );

        if !cap_flags.contains(CapabilityFlags::VIDEO_CAPTURE) {
            return Ok(None);
        }

        let (pixfmt, fract) = negotiate_format(&dev, prefs)?;
        let capture = dev.video_capture(pixfmt)?;

        let format = capture.format();
        let width = format.width();
        let height = format.height();

        let actual = capture.set_frame_interval(fract)?;

        log::info!(
            "opened {} ({}), {}x{} @ {:.1}Hz",
            caps.card(),
            path.display(),
            width,
            height,
            1.0 / actual.as_f32(),
        );

        let stream = capture.into_stream(2)?;

        Ok(Some(Self {
            stream,
            width,
            height,
            t_dequeue: Timer::new("dequeue"),
            t_decode: Timer::new("decode"),
        }))
    }

    /// Reads the next frame from the camera.
    ///
    /// If no frame is available, this method will block until one is.
    pub fn read(&mut self) -> anyhow::Result<RgbaImage> {
        let dequeue_guard = self.t_dequeue.start();
        let (width, height) = (self.width, self.height);
        let t_decode = &self.t_decode;
        self.stream
            .dequeue(|buf| {
                drop(dequeue_guard);
                Ok(t_decode.time(|| decode_frame(&buf, width, height)))
            })
            .map_err(Into::into)
    }
}

impl FrameSource for Webcam {
    fn read_frame(&mut self) -> anyhow::Result<Option<RgbaImage>> {
        match self.read() {
            Ok(image) => Ok(Some(image)),
            Err(e) => {
                log::warn!("webcam stopped delivering frames: {e:#}");
                Ok(None)
            }
        }
    }

    fn timers(&self) -> Vec<&Timer> {
        vec![&self.t_dequeue, &self.t_decode]
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use image::{DynamicImage, Rgb, RgbImage};

    use super::*;

    fn fmt(width: u32, height: u32, fps: u32) -> FrameFormat {
        FrameFormat {
            width,
            height,
            frame_interval: Fract::new(1, fps),
        }
    }

    fn formats() -> Vec<FrameFormat> {
        vec![
            fmt(640, 480, 30),
            fmt(640, 480, 60),
            fmt(1280, 720, 30),
            fmt(1920, 1080, 15),
        ]
    }

    #[test]
    fn prefers_resolution() {
        let prefs = FramePrefs::default();
        assert_eq!(
            negotiate_format_step(&formats(), prefs),
            Some(fmt(1920, 1080, 15))
        );

        let prefs = FramePrefs {
            fps: Some(30),
            ..FramePrefs::default()
        };
        assert_eq!(
            negotiate_format_step(&formats(), prefs),
            Some(fmt(1280, 720, 30))
        );
    }

    #[test]
    fn prefers_framerate() {
        let prefs = FramePrefs {
            resolution: Some((640, 480)),
            fps: Some(30),
            pref: ParamPreference::Framerate,
        };
        assert_eq!(
            negotiate_format_step(&formats(), prefs),
            Some(fmt(640, 480, 60))
        );
    }

    #[test]
    fn unsatisfiable() {
        let prefs = FramePrefs {
            resolution: Some((3840, 2160)),
            ..FramePrefs::default()
        };
        assert_eq!(negotiate_format_step(&formats(), prefs), None);
        assert_eq!(negotiate_format_step(&[], FramePrefs::default()), None);
    }

    #[test]
    fn decode() {
        let frame = RgbImage::from_pixel(16, 8, Rgb([200, 10, 10]));
        let mut jpeg = Vec::new();
        DynamicImage::ImageRgb8(frame)
            .write_to(&mut Cursor::new(&mut jpeg), ImageFormat::Jpeg)
            .unwrap();

        let image = decode_frame(&jpeg, 1, 1);
        assert_eq!(image.dimensions(), (16, 8));
        let [r, g, _, a] = image.get_pixel(8, 4).0;
        assert!(r > 150 && g < 60, "{:?}", image.get_pixel(8, 4));
        assert_eq!(a, 255);
    }

    #[test]
    fn corrupt_frame_is_blank() {
        let image = decode_frame(b"\xff\xd8not really a jpeg", 32, 24);
        assert_eq!(image.dimensions(), (32, 24));
        assert!(image.pixels().all(|px| px.0 == [0, 0, 0, 0]));
    }
}
