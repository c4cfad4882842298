//! Region geometries: reading, reprojection, centroids and random point placement.
//!
//! Regions are read from a GeoJSON `FeatureCollection`, one region per feature. A region's ID is the
//! position of its feature in the collection, which must match the row order of the flux tables.
use crate::input::input_err_msg;
use anyhow::{Context, Result, bail, ensure};
use geo::{
    BoundingRect, Centroid, Contains, Coord, LineString, MapCoords, MultiPolygon, Point, Polygon,
    Rect,
};
use indexmap::IndexMap;
use log::debug;
use proj4rs::proj::Proj as Proj4;
use proj4rs::transform::transform;
use rand::Rng;
use serde_json::Value;
use serde_string_enum::DeserializeLabeledStringEnum;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

/// Maximum number of candidate points drawn for each point placed inside a region
const MAX_PLACEMENT_ATTEMPTS: usize = 1_000_000;

/// The coordinate reference system of a geometry source
#[derive(Debug, Clone, Copy, PartialEq, Default, DeserializeLabeledStringEnum)]
pub enum Crs {
    /// Planar coordinates in metres
    #[default]
    #[string = "metric"]
    Metric,
    /// WGS84 longitude and latitude in degrees
    #[string = "lonlat"]
    LonLat,
}

/// An administrative area
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    /// Position of the region in the geometry source
    pub id: u32,
    /// Whether any flux originates from this region
    pub included: bool,
    /// Centroid in planar coordinates (metres)
    pub centroid: Coord<f64>,
    /// Region boundary in planar coordinates (metres)
    pub geometry: MultiPolygon<f64>,
}

/// Regions in source order, annotated with inclusion flags and centroids
#[derive(Debug, Clone, PartialEq)]
pub struct RegionTable {
    regions: Vec<Region>,
}

impl RegionTable {
    /// Build a region table from planar geometries.
    ///
    /// # Arguments
    ///
    /// * `geometries` - One geometry per region, in source order
    /// * `areas_included` - IDs of regions with outgoing flux
    pub fn from_geometries(
        geometries: Vec<MultiPolygon<f64>>,
        areas_included: &[u32],
    ) -> Result<Self> {
        for &id in areas_included {
            ensure!(
                (id as usize) < geometries.len(),
                "Area {id} has flux data but there are only {} regions in the geometry source",
                geometries.len()
            );
        }

        let regions = geometries
            .into_iter()
            .enumerate()
            .map(|(idx, geometry)| {
                let id = u32::try_from(idx)?;
                let centroid = geometry
                    .centroid()
                    .with_context(|| format!("Could not compute centroid of region {id}"))?;
                Ok(Region {
                    id,
                    included: areas_included.contains(&id),
                    centroid: centroid.into(),
                    geometry,
                })
            })
            .collect::<Result<_>>()?;

        Ok(Self { regions })
    }

    /// Read regions from a GeoJSON file, reprojecting them to metres if needed
    pub fn load(file_path: &Path, crs: Crs, areas_included: &[u32]) -> Result<Self> {
        let mut geometries = read_geojson(file_path)?;
        if crs == Crs::LonLat {
            geometries = reproject_to_metric(&geometries)
                .with_context(|| format!("Could not reproject {}", file_path.display()))?;
        }
        debug!("Read {} regions from {}", geometries.len(), file_path.display());

        Self::from_geometries(geometries, areas_included)
    }

    /// All regions, in ID order
    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    /// Get a region by ID
    pub fn get(&self, id: u32) -> Option<&Region> {
        self.regions.get(id as usize)
    }

    /// Iterate over included regions in ID order
    pub fn iter_included(&self) -> impl Iterator<Item = &Region> {
        self.regions.iter().filter(|region| region.included)
    }

    /// Map from region ID to a dense 0-based index over included regions only
    pub fn local_indexes(&self) -> IndexMap<u32, u32> {
        self.iter_included()
            .zip(0..)
            .map(|(region, local)| (region.id, local))
            .collect()
    }
}

/// Write the included regions as `local_index x y` lines
pub fn write_region_file(file_path: &Path, table: &RegionTable) -> Result<()> {
    let file = File::create(file_path)
        .with_context(|| format!("Could not create {}", file_path.display()))?;
    let mut writer = BufWriter::new(file);
    for (region, local) in table.iter_included().zip(0..) {
        writeln!(writer, "{local} {} {}", region.centroid.x, region.centroid.y)?;
    }
    writer.flush()?;

    Ok(())
}

/// Write the map from region ID to local index as JSON
pub fn write_index_map(file_path: &Path, table: &RegionTable) -> Result<()> {
    let map: IndexMap<String, u32> = table
        .local_indexes()
        .into_iter()
        .map(|(id, local)| (id.to_string(), local))
        .collect();
    fs::write(file_path, serde_json::to_string(&map)?)
        .with_context(|| format!("Could not write {}", file_path.display()))?;

    Ok(())
}

/// Read one geometry per feature from a GeoJSON file
pub fn read_geojson(file_path: &Path) -> Result<Vec<MultiPolygon<f64>>> {
    let bytes = fs::read(file_path).with_context(|| input_err_msg(file_path))?;
    read_geojson_bytes(&bytes).with_context(|| input_err_msg(file_path))
}

fn read_geojson_bytes(bytes: &[u8]) -> Result<Vec<MultiPolygon<f64>>> {
    let value: Value = serde_json::from_slice(bytes).context("Failed to parse GeoJSON")?;
    let features = value["features"]
        .as_array()
        .context("GeoJSON must be a FeatureCollection")?;

    features
        .iter()
        .enumerate()
        .map(|(idx, feature)| {
            parse_geometry(&feature["geometry"])
                .with_context(|| format!("Invalid geometry for feature {idx}"))
        })
        .collect()
}

fn parse_geometry(geometry: &Value) -> Result<MultiPolygon<f64>> {
    let coords = geometry["coordinates"]
        .as_array()
        .context("Missing coordinates")?;
    match geometry["type"].as_str() {
        Some("Polygon") => Ok(MultiPolygon(vec![parse_polygon(coords)?])),
        Some("MultiPolygon") => {
            let polygons = coords
                .iter()
                .map(|polygon| parse_polygon(polygon.as_array().context("Invalid polygon")?))
                .collect::<Result<_>>()?;
            Ok(MultiPolygon(polygons))
        }
        Some(other) => bail!("Unsupported geometry type {other}"),
        None => bail!("Missing geometry type"),
    }
}

/// Parse polygon coordinates: the exterior ring followed by any interior rings
fn parse_polygon(rings: &[Value]) -> Result<Polygon<f64>> {
    let mut rings = rings
        .iter()
        .map(|ring| parse_ring(ring.as_array().context("Invalid ring")?));
    let exterior = rings.next().context("Polygon has no exterior ring")??;
    let interiors = rings.collect::<Result<_>>()?;

    Ok(Polygon::new(exterior, interiors))
}

fn parse_ring(coords: &[Value]) -> Result<LineString<f64>> {
    let points = coords
        .iter()
        .map(|pair| {
            let pair = pair.as_array().context("Invalid coordinate")?;
            ensure!(pair.len() >= 2, "Coordinates must have at least two values");
            let x = pair[0].as_f64().context("x must be a number")?;
            let y = pair[1].as_f64().context("y must be a number")?;
            Ok(Coord { x, y })
        })
        .collect::<Result<_>>()?;

    // geo closes rings on construction
    Ok(LineString(points))
}

/// Bounding box around all geometries
fn total_bounds(geometries: &[MultiPolygon<f64>]) -> Option<Rect<f64>> {
    geometries
        .iter()
        .filter_map(|geometry| geometry.bounding_rect())
        .reduce(|a, b| {
            Rect::new(
                Coord {
                    x: a.min().x.min(b.min().x),
                    y: a.min().y.min(b.min().y),
                },
                Coord {
                    x: a.max().x.max(b.max().x),
                    y: a.max().y.max(b.max().y),
                },
            )
        })
}

/// PROJ.4 string for the WGS84 UTM zone containing `center` (lon/lat degrees)
fn utm_proj4(center: Coord<f64>) -> String {
    let zone = (((center.x + 180.0) / 6.0).floor() as i32 + 1).clamp(1, 60);
    let south = if center.y >= 0.0 { "" } else { " +south" };
    format!("+proj=utm +zone={zone}{south} +datum=WGS84 +units=m +no_defs +type=crs")
}

/// Reproject geometries from WGS84 lon/lat to the UTM zone at the centre of their bounds
pub fn reproject_to_metric(geometries: &[MultiPolygon<f64>]) -> Result<Vec<MultiPolygon<f64>>> {
    let bounds = total_bounds(geometries).context("Cannot reproject empty geometries")?;

    let from_str = "+proj=longlat +datum=WGS84 +no_defs +type=crs";
    let from = Proj4::from_proj_string(from_str)
        .with_context(|| format!("Failed to build source projection: {from_str}"))?;
    let to_str = utm_proj4(bounds.center());
    let to = Proj4::from_proj_string(&to_str)
        .with_context(|| format!("Failed to build target projection: {to_str}"))?;
    debug!("Reprojecting regions to {to_str}");

    geometries
        .iter()
        .map(|shape| {
            shape.try_map_coords(|coord: Coord<f64>| {
                // Radians in, metres out
                let mut point = (coord.x.to_radians(), coord.y.to_radians(), 0.0);
                transform(&from, &to, &mut point).context("CRS transform failed")?;
                Ok(Coord {
                    x: point.0,
                    y: point.1,
                })
            })
        })
        .collect()
}

/// Draw `n` points uniformly at random inside a region by rejection sampling within its bounds
pub fn random_points_in_region<R: Rng + ?Sized>(
    geometry: &MultiPolygon<f64>,
    n: usize,
    rng: &mut R,
) -> Result<Vec<Coord<f64>>> {
    let bounds = geometry
        .bounding_rect()
        .context("Cannot place points in an empty region")?;
    let (min, max) = (bounds.min(), bounds.max());

    let mut points = Vec::with_capacity(n);
    while points.len() < n {
        let point = (0..MAX_PLACEMENT_ATTEMPTS)
            .map(|_| Point::new(rng.gen_range(min.x..=max.x), rng.gen_range(min.y..=max.y)))
            .find(|point| geometry.contains(point))
            .context("Could not place a point inside region; is its area zero?")?;
        points.push(point.into());
    }

    Ok(points)
}
