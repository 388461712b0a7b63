// persist.rs — POI layouts on disk.
//
// File format (JSON):
//
//   {
//     "POI":     [ { "name": "U1", "x": 41.0, "y": 17.5, "temp": 63.2 }, ... ],
//     "POI img": "<base64 JPEG of the grayscale frame>"
//   }
//
// The snapshot is the 8-bit grayscale, so reading it back reconstructs the
// raw buffer under the fixed recorded-video scale (gray 0..255 = 15..120 °C).
// Up to JPEG quantisation the temperatures survive the round trip.
//
// Four of the stored POIs can be promoted to the heat-source border by name;
// they are removed from the POI list and become the border in the order given.
// Writing a frame whose border came from named points stores the corners
// back as POIs under those names, at their current positions. A border
// without names is not written.

use std::fs;
use std::io::Cursor;
use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageFormat};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::convert::convert_image;
use crate::error::{Error, Result};
use crate::frame::ThermoFrame;
use crate::homography::Point2;
use crate::image::Image;
use crate::source::TemperatureScale;

const JPEG_QUALITY: u8 = 95;

#[derive(Debug, Serialize, Deserialize)]
struct PoiRecord {
    name: String,
    x: f32,
    y: f32,
    /// `null` when the point was outside the frame.
    temp: Option<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PoiFile {
    #[serde(rename = "POI")]
    poi: Vec<PoiRecord>,
    #[serde(rename = "POI img")]
    image: String,
}

/// Serialise `frame`'s POIs and grayscale snapshot.
pub fn to_json_string(frame: &ThermoFrame) -> Result<String> {
    let record = |name: &str, position: Point2, temperature: f32| PoiRecord {
        name: name.to_string(),
        x: position.x,
        y: position.y,
        temp: temperature.is_finite().then_some(temperature),
    };
    let mut poi: Vec<PoiRecord> = frame
        .pois
        .iter()
        .map(|p| record(&p.name, p.position, p.temperature))
        .collect();
    if frame.border_names.len() == frame.border.len() {
        poi.extend(
            frame
                .border_names
                .iter()
                .zip(&frame.border)
                .map(|(name, &p)| record(name, p, frame.temperature_at(p))),
        );
    } else if !frame.border.is_empty() {
        debug!("border has no point names; not written");
    }
    let file = PoiFile {
        poi,
        image: STANDARD.encode(encode_jpeg(frame.gray())?),
    };
    Ok(serde_json::to_string_pretty(&file)?)
}

/// Parse a POI document. `border_names` is an optional comma-separated list
/// of exactly four POI names to turn into the heat-source border.
pub fn from_json_str(json: &str, border_names: Option<&str>) -> Result<ThermoFrame> {
    let file: PoiFile = serde_json::from_str(json)?;
    let bytes = STANDARD.decode(file.image.trim())?;
    if bytes.is_empty() {
        return Err(Error::MalformedPersistedState("empty POI image".into()));
    }
    let gray = image::load_from_memory_with_format(&bytes, ImageFormat::Jpeg)?.into_luma8();
    let (w, h) = gray.dimensions();
    let gray = Image::from_vec(w as usize, h as usize, gray.into_raw());

    let mut frame = ThermoFrame::new(convert_image::<u8, u16>(&gray), TemperatureScale::recorded());
    let mut records = file.poi;

    if let Some(names) = border_names {
        let names: Vec<&str> = names.split(',').map(str::trim).collect();
        if names.len() != 4 {
            return Err(Error::BorderPointCount {
                expected: 4,
                got: names.len(),
            });
        }
        for name in names {
            let idx = records
                .iter()
                .position(|r| r.name == name)
                .ok_or_else(|| Error::MissingBorderPoint(name.to_string()))?;
            let r = records.remove(idx);
            frame.border.push(Point2::new(r.x, r.y));
            frame.border_names.push(r.name);
        }
    }

    for r in records {
        frame.add_poi(r.name, Point2::new(r.x, r.y));
    }
    debug!(
        "loaded {} POIs and {} border points on a {w}x{h} snapshot",
        frame.pois.len(),
        frame.border.len()
    );
    Ok(frame)
}

/// Write `frame`'s POIs to `path`.
pub fn write_poi_json(path: impl AsRef<Path>, frame: &ThermoFrame) -> Result<()> {
    let path = path.as_ref();
    fs::write(path, to_json_string(frame)?)?;
    info!("{} POIs written to {}", frame.pois.len(), path.display());
    Ok(())
}

/// Read a POI file written by [`write_poi_json`].
pub fn read_poi_json(path: impl AsRef<Path>, border_names: Option<&str>) -> Result<ThermoFrame> {
    let path = path.as_ref();
    let frame = from_json_str(&fs::read_to_string(path)?, border_names)?;
    info!("{} POIs read from {}", frame.pois.len(), path.display());
    Ok(frame)
}

fn encode_jpeg(gray: &Image<u8>) -> Result<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    JpegEncoder::new_with_quality(&mut buf, JPEG_QUALITY).encode(
        gray.as_slice(),
        gray.width() as u32,
        gray.height() as u32,
        ExtendedColorType::L8,
    )?;
    Ok(buf.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> ThermoFrame {
        let raw = Image::from_fn(32, 24, |x, y| (40 + 4 * x + 2 * y) as u16);
        let mut f = ThermoFrame::new(raw, TemperatureScale::recorded());
        f.add_poi("U1", Point2::new(3.0, 4.0));
        f.add_poi("tl", Point2::new(1.0, 1.0));
        f.add_poi("tr", Point2::new(30.0, 1.0));
        f.add_poi("br", Point2::new(30.0, 22.0));
        f.add_poi("bl", Point2::new(1.0, 22.0));
        f
    }

    #[test]
    fn test_document_shape() {
        let json = to_json_string(&frame()).unwrap();
        let v: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(v["POI"].as_array().unwrap().len(), 5);
        assert_eq!(v["POI"][0]["name"], "U1");
        assert!(v["POI img"].is_string());
    }

    #[test]
    fn test_border_extraction() {
        let json = to_json_string(&frame()).unwrap();
        let f = from_json_str(&json, Some("tl, tr,br,bl")).unwrap();
        assert_eq!(f.pois.len(), 1);
        assert_eq!(f.pois[0].name, "U1");
        assert_eq!(f.border[1], Point2::new(30.0, 1.0));
        assert_eq!((f.width(), f.height()), (32, 24));
    }

    #[test]
    fn test_nan_temperature_written_as_null() {
        let mut f = frame();
        f.add_poi("off", Point2::new(-5.0, 0.0));
        let json = to_json_string(&f).unwrap();
        let v: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert!(v["POI"][5]["temp"].is_null());
        assert!(from_json_str(&json, None).unwrap().pois[5].temperature.is_nan());
    }

    #[test]
    fn test_malformed_inputs() {
        assert!(matches!(from_json_str("{", None), Err(Error::Json(_))));
        let bad = r#"{"POI": [], "POI img": "***"}"#;
        assert!(matches!(from_json_str(bad, None), Err(Error::Base64(_))));
        let empty = r#"{"POI": [], "POI img": ""}"#;
        assert!(matches!(
            from_json_str(empty, None),
            Err(Error::MalformedPersistedState(_))
        ));
    }
}
