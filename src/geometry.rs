//! Well-Known Binary and GeoPackage geometry codecs.
//!
//! Decoding accepts OGC/ISO WKB and PostGIS EWKB (Z/M ordinates and embedded SRIDs are
//! accepted and dropped). Encoding always produces little-endian 2D OGC WKB.

use geo::{
    Coord, Geometry, GeometryCollection, LineString, MultiLineString, MultiPoint, MultiPolygon,
    Point, Polygon,
};

use crate::error::{EtlError, EtlResult};

const EWKB_Z: u32 = 0x8000_0000;
const EWKB_M: u32 = 0x4000_0000;
const EWKB_SRID: u32 = 0x2000_0000;

const WKB_POINT: u32 = 1;
const WKB_LINESTRING: u32 = 2;
const WKB_POLYGON: u32 = 3;
const WKB_MULTIPOINT: u32 = 4;
const WKB_MULTILINESTRING: u32 = 5;
const WKB_MULTIPOLYGON: u32 = 6;
const WKB_GEOMETRYCOLLECTION: u32 = 7;

/// Decode a WKB/EWKB blob.
pub fn decode_wkb(bytes: &[u8]) -> EtlResult<Geometry<f64>> {
    let mut cursor = WkbCursor::new(bytes);
    let geometry = cursor.read_geometry()?;
    if cursor.pos != bytes.len() {
        log::trace!("ignoring {} trailing bytes after wkb geometry", bytes.len() - cursor.pos);
    }
    Ok(geometry)
}

/// Encode a geometry as little-endian 2D WKB.
///
/// `Line`, `Rect` and `Triangle` are written as their line string / polygon equivalents.
pub fn encode_wkb(geometry: &Geometry<f64>) -> Vec<u8> {
    let mut out = Vec::with_capacity(64);
    write_geometry(&mut out, geometry);
    out
}

/// A decoded GeoPackage geometry blob.
#[derive(Debug, Clone, PartialEq)]
pub struct GpkgGeometry {
    pub srs_id: i32,
    /// `None` when the header marks the geometry as empty.
    pub geometry: Option<Geometry<f64>>,
}

/// Decode a GeoPackage binary geometry (`GP` header, optional envelope, WKB body).
pub fn decode_gpkg(bytes: &[u8]) -> EtlResult<GpkgGeometry> {
    if bytes.len() < 8 || &bytes[0..2] != b"GP" {
        return Err(geometry_err("missing 'GP' magic"));
    }
    let flags = bytes[3];
    let little_endian = flags & 0x01 == 1;
    let envelope_len = match (flags >> 1) & 0x07 {
        0 => 0,
        1 => 32,
        2 | 3 => 48,
        4 => 64,
        other => return Err(geometry_err(format!("invalid envelope indicator {other}"))),
    };
    let empty = flags & 0x10 != 0;

    let srs_bytes = [bytes[4], bytes[5], bytes[6], bytes[7]];
    let srs_id = if little_endian {
        i32::from_le_bytes(srs_bytes)
    } else {
        i32::from_be_bytes(srs_bytes)
    };

    let body = 8 + envelope_len;
    if bytes.len() < body {
        return Err(geometry_err("truncated geopackage header"));
    }
    if empty {
        return Ok(GpkgGeometry {
            srs_id,
            geometry: None,
        });
    }
    Ok(GpkgGeometry {
        srs_id,
        geometry: Some(decode_wkb(&bytes[body..])?),
    })
}

/// Encode a geometry as a GeoPackage blob (little-endian header, no envelope).
pub fn encode_gpkg(geometry: &Geometry<f64>, srs_id: i32) -> Vec<u8> {
    let mut out = Vec::with_capacity(72);
    out.extend_from_slice(b"GP");
    out.push(0);
    out.push(0x01);
    out.extend_from_slice(&srs_id.to_le_bytes());
    write_geometry(&mut out, geometry);
    out
}

fn geometry_err(message: impl Into<String>) -> EtlError {
    EtlError::Geometry {
        context: "wkb".to_string(),
        message: message.into(),
    }
}

struct WkbCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

#[derive(Clone, Copy)]
struct Layout {
    little_endian: bool,
    extra_ordinates: usize,
}

impl<'a> WkbCursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> EtlResult<&'a [u8]> {
        let end = self.pos + n;
        let slice = self
            .buf
            .get(self.pos..end)
            .ok_or_else(|| geometry_err(format!("unexpected end of wkb at byte {}", self.pos)))?;
        self.pos = end;
        Ok(slice)
    }

    fn read_u8(&mut self) -> EtlResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn read_u32(&mut self, little_endian: bool) -> EtlResult<u32> {
        let b = self.take(4)?;
        let arr = [b[0], b[1], b[2], b[3]];
        Ok(if little_endian {
            u32::from_le_bytes(arr)
        } else {
            u32::from_be_bytes(arr)
        })
    }

    fn read_f64(&mut self, little_endian: bool) -> EtlResult<f64> {
        let b = self.take(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(if little_endian {
            f64::from_le_bytes(arr)
        } else {
            f64::from_be_bytes(arr)
        })
    }

    fn read_coord(&mut self, layout: Layout) -> EtlResult<Coord<f64>> {
        let x = self.read_f64(layout.little_endian)?;
        let y = self.read_f64(layout.little_endian)?;
        for _ in 0..layout.extra_ordinates {
            self.read_f64(layout.little_endian)?;
        }
        Ok(Coord { x, y })
    }

    fn read_line_string(&mut self, layout: Layout) -> EtlResult<LineString<f64>> {
        let n = self.read_u32(layout.little_endian)? as usize;
        let mut coords = Vec::with_capacity(n.min(self.buf.len() / 16));
        for _ in 0..n {
            coords.push(self.read_coord(layout)?);
        }
        Ok(LineString::new(coords))
    }

    fn read_polygon(&mut self, layout: Layout) -> EtlResult<Polygon<f64>> {
        let rings = self.read_u32(layout.little_endian)? as usize;
        if rings == 0 {
            return Ok(Polygon::new(LineString::new(Vec::new()), Vec::new()));
        }
        let exterior = self.read_line_string(layout)?;
        let mut interiors = Vec::with_capacity(rings - 1);
        for _ in 1..rings {
            interiors.push(self.read_line_string(layout)?);
        }
        Ok(Polygon::new(exterior, interiors))
    }

    fn read_header(&mut self) -> EtlResult<(u32, Layout)> {
        let little_endian = match self.read_u8()? {
            0 => false,
            1 => true,
            other => return Err(geometry_err(format!("invalid byte order marker {other}"))),
        };
        let raw = self.read_u32(little_endian)?;
        let mut extra = 0;
        if raw & EWKB_Z != 0 {
            extra += 1;
        }
        if raw & EWKB_M != 0 {
            extra += 1;
        }
        if raw & EWKB_SRID != 0 {
            self.read_u32(little_endian)?;
        }
        let code = raw & 0x0FFF_FFFF;
        extra += match code / 1000 {
            0 => 0,
            1 | 2 => 1,
            3 => 2,
            _ => return Err(geometry_err(format!("unsupported geometry type code {code}"))),
        };
        Ok((
            code % 1000,
            Layout {
                little_endian,
                extra_ordinates: extra,
            },
        ))
    }

    fn read_geometry(&mut self) -> EtlResult<Geometry<f64>> {
        let (kind, layout) = self.read_header()?;
        let geometry = match kind {
            WKB_POINT => {
                let c = self.read_coord(layout)?;
                if c.x.is_nan() && c.y.is_nan() {
                    // POINT EMPTY
                    Geometry::GeometryCollection(GeometryCollection::default())
                } else {
                    Geometry::Point(Point(c))
                }
            }
            WKB_LINESTRING => Geometry::LineString(self.read_line_string(layout)?),
            WKB_POLYGON => Geometry::Polygon(self.read_polygon(layout)?),
            WKB_MULTIPOINT => {
                let points = self
                    .read_members(layout)?
                    .into_iter()
                    .filter_map(|g| match g {
                        Geometry::Point(p) => Some(Ok(p)),
                        Geometry::GeometryCollection(gc) if gc.0.is_empty() => None,
                        _ => Some(Err(geometry_err("multipoint member is not a point"))),
                    })
                    .collect::<EtlResult<Vec<_>>>()?;
                Geometry::MultiPoint(MultiPoint::new(points))
            }
            WKB_MULTILINESTRING => {
                let lines = self
                    .read_members(layout)?
                    .into_iter()
                    .map(|g| match g {
                        Geometry::LineString(l) => Ok(l),
                        _ => Err(geometry_err("multilinestring member is not a linestring")),
                    })
                    .collect::<EtlResult<Vec<_>>>()?;
                Geometry::MultiLineString(MultiLineString::new(lines))
            }
            WKB_MULTIPOLYGON => {
                let polygons = self
                    .read_members(layout)?
                    .into_iter()
                    .map(|g| match g {
                        Geometry::Polygon(p) => Ok(p),
                        _ => Err(geometry_err("multipolygon member is not a polygon")),
                    })
                    .collect::<EtlResult<Vec<_>>>()?;
                Geometry::MultiPolygon(MultiPolygon::new(polygons))
            }
            WKB_GEOMETRYCOLLECTION => {
                Geometry::GeometryCollection(GeometryCollection::new_from(self.read_members(layout)?))
            }
            other => return Err(geometry_err(format!("unsupported geometry type {other}"))),
        };
        Ok(geometry)
    }

    fn read_members(&mut self, layout: Layout) -> EtlResult<Vec<Geometry<f64>>> {
        let n = self.read_u32(layout.little_endian)? as usize;
        let mut members = Vec::with_capacity(n.min(self.buf.len() / 9));
        for _ in 0..n {
            members.push(self.read_geometry()?);
        }
        Ok(members)
    }
}

fn write_header(out: &mut Vec<u8>, kind: u32) {
    out.push(1);
    out.extend_from_slice(&kind.to_le_bytes());
}

fn write_count(out: &mut Vec<u8>, n: usize) {
    out.extend_from_slice(&(n as u32).to_le_bytes());
}

fn write_coord(out: &mut Vec<u8>, c: Coord<f64>) {
    out.extend_from_slice(&c.x.to_le_bytes());
    out.extend_from_slice(&c.y.to_le_bytes());
}

fn write_line_string_body(out: &mut Vec<u8>, line: &LineString<f64>) {
    write_count(out, line.0.len());
    for c in &line.0 {
        write_coord(out, *c);
    }
}

fn write_polygon_body(out: &mut Vec<u8>, polygon: &Polygon<f64>) {
    if polygon.exterior().0.is_empty() {
        write_count(out, 0);
        return;
    }
    write_count(out, 1 + polygon.interiors().len());
    write_line_string_body(out, polygon.exterior());
    for ring in polygon.interiors() {
        write_line_string_body(out, ring);
    }
}

fn write_geometry(out: &mut Vec<u8>, geometry: &Geometry<f64>) {
    match geometry {
        Geometry::Point(p) => {
            write_header(out, WKB_POINT);
            write_coord(out, p.0);
        }
        Geometry::Line(line) => {
            write_header(out, WKB_LINESTRING);
            write_line_string_body(out, &LineString::new(vec![line.start, line.end]));
        }
        Geometry::LineString(line) => {
            write_header(out, WKB_LINESTRING);
            write_line_string_body(out, line);
        }
        Geometry::Polygon(polygon) => {
            write_header(out, WKB_POLYGON);
            write_polygon_body(out, polygon);
        }
        Geometry::Rect(rect) => {
            write_header(out, WKB_POLYGON);
            write_polygon_body(out, &rect.to_polygon());
        }
        Geometry::Triangle(triangle) => {
            write_header(out, WKB_POLYGON);
            write_polygon_body(out, &triangle.to_polygon());
        }
        Geometry::MultiPoint(points) => {
            write_header(out, WKB_MULTIPOINT);
            write_count(out, points.0.len());
            for p in &points.0 {
                write_geometry(out, &Geometry::Point(*p));
            }
        }
        Geometry::MultiLineString(lines) => {
            write_header(out, WKB_MULTILINESTRING);
            write_count(out, lines.0.len());
            for line in &lines.0 {
                write_header(out, WKB_LINESTRING);
                write_line_string_body(out, line);
            }
        }
        Geometry::MultiPolygon(polygons) => {
            write_header(out, WKB_MULTIPOLYGON);
            write_count(out, polygons.0.len());
            for polygon in &polygons.0 {
                write_header(out, WKB_POLYGON);
                write_polygon_body(out, polygon);
            }
        }
        Geometry::GeometryCollection(collection) => {
            write_header(out, WKB_GEOMETRYCOLLECTION);
            write_count(out, collection.0.len());
            for member in &collection.0 {
                write_geometry(out, member);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{decode_gpkg, decode_wkb, encode_gpkg, encode_wkb};
    use crate::error::EtlError;
    use geo::{polygon, Geometry, Point};

    #[test]
    fn decodes_big_endian_point() {
        let mut wkb = vec![0u8, 0, 0, 0, 1];
        wkb.extend_from_slice(&(-75.5f64).to_be_bytes());
        wkb.extend_from_slice(&45.25f64.to_be_bytes());
        assert_eq!(
            decode_wkb(&wkb).unwrap(),
            Geometry::Point(Point::new(-75.5, 45.25))
        );
    }

    #[test]
    fn drops_z_from_ewkb_with_srid() {
        let mut wkb = vec![1u8];
        wkb.extend_from_slice(&(1u32 | 0x8000_0000 | 0x2000_0000).to_le_bytes());
        wkb.extend_from_slice(&4326u32.to_le_bytes());
        for v in [1.0f64, 2.0, 99.0] {
            wkb.extend_from_slice(&v.to_le_bytes());
        }
        assert_eq!(decode_wkb(&wkb).unwrap(), Geometry::Point(Point::new(1.0, 2.0)));
    }

    #[test]
    fn polygon_with_hole_survives_encoding() {
        let poly = polygon!(
            exterior: [(x: 0.0, y: 0.0), (x: 4.0, y: 0.0), (x: 4.0, y: 4.0), (x: 0.0, y: 0.0)],
            interiors: [[(x: 1.0, y: 1.0), (x: 2.0, y: 1.0), (x: 2.0, y: 2.0), (x: 1.0, y: 1.0)]],
        );
        let geom = Geometry::Polygon(poly);
        assert_eq!(decode_wkb(&encode_wkb(&geom)).unwrap(), geom);
    }

    #[test]
    fn gpkg_header_with_envelope_is_skipped() {
        let geom = Geometry::Point(Point::new(3.0, 4.0));
        let mut blob = vec![b'G', b'P', 0, 0x01 | (1 << 1)];
        blob.extend_from_slice(&4326i32.to_le_bytes());
        for v in [3.0f64, 3.0, 4.0, 4.0] {
            blob.extend_from_slice(&v.to_le_bytes());
        }
        blob.extend_from_slice(&encode_wkb(&geom));

        let decoded = decode_gpkg(&blob).unwrap();
        assert_eq!(decoded.srs_id, 4326);
        assert_eq!(decoded.geometry, Some(geom.clone()));
        assert_eq!(decode_gpkg(&encode_gpkg(&geom, 4326)).unwrap().geometry, Some(geom));
    }

    #[test]
    fn truncated_blob_is_an_error() {
        let err = decode_wkb(&[1, 1, 0, 0, 0, 0]).unwrap_err();
        assert!(matches!(err, EtlError::Geometry { .. }));
        assert!(decode_gpkg(b"XX\0\x01\0\0\0\0").is_err());
    }
}
