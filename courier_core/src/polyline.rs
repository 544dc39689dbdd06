use thiserror::Error;

use crate::geopoint::GeoPoint;

/// Coordinates are carried with five decimal places on the wire (~1.1 m).
const PRECISION: f64 = 1e5;

#[derive(Debug, Error)]
pub enum PolylineError {
    #[error("encoded polyline truncated or corrupt at byte {offset}")]
    Truncated { offset: usize },
}

/// Decodes a Google-style polyline (5-bit chunked, zig-zag delta encoded)
/// into absolute coordinates. An empty string decodes to an empty list.
pub fn decode(encoded: &str) -> Result<Vec<GeoPoint>, PolylineError> {
    let bytes = encoded.as_bytes();
    let mut points = Vec::new();

    let mut offset = 0;
    let mut lat: i64 = 0;
    let mut lng: i64 = 0;

    while offset < bytes.len() {
        let (dlat, next) = decode_value(bytes, offset)?;
        let (dlng, next) = decode_value(bytes, next)?;

        lat += dlat;
        lng += dlng;

        points.push(GeoPoint::new(lat as f64 / PRECISION, lng as f64 / PRECISION));
        offset = next;
    }

    Ok(points)
}

/// The inverse wire convention. Lossy to 1e-5 degrees; `decode(encode(x))`
/// is not expected to reproduce `x` bit for bit.
pub fn encode(points: &[GeoPoint]) -> String {
    let mut encoded = String::new();

    let mut prev_lat: i64 = 0;
    let mut prev_lng: i64 = 0;

    for point in points {
        let lat = (point.lat * PRECISION).round() as i64;
        let lng = (point.lng * PRECISION).round() as i64;

        encode_value(lat - prev_lat, &mut encoded);
        encode_value(lng - prev_lng, &mut encoded);

        prev_lat = lat;
        prev_lng = lng;
    }

    encoded
}

fn decode_value(bytes: &[u8], start: usize) -> Result<(i64, usize), PolylineError> {
    let mut offset = start;
    let mut result: i64 = 0;
    let mut shift = 0;

    loop {
        // A real coordinate delta fits in six 5-bit chunks; a longer run of
        // continuation bits means the input is corrupt.
        if offset >= bytes.len() || bytes[offset] < 63 || shift >= 35 {
            return Err(PolylineError::Truncated { offset });
        }

        let chunk = (bytes[offset] - 63) as i64;
        offset += 1;

        result |= (chunk & 0x1f) << shift;
        shift += 5;

        if chunk < 0x20 {
            break;
        }
    }

    // Undo the zig-zag sign packing.
    let value = if result & 1 != 0 {
        !(result >> 1)
    } else {
        result >> 1
    };

    Ok((value, offset))
}

fn encode_value(value: i64, encoded: &mut String) {
    let mut remaining = if value < 0 { !(value << 1) } else { value << 1 };

    while remaining >= 0x20 {
        encoded.push(((0x20 | (remaining & 0x1f)) + 63) as u8 as char);
        remaining >>= 5;
    }

    encoded.push((remaining + 63) as u8 as char);
}
