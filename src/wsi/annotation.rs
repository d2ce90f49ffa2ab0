//! ASAP XML annotations
//!
//! ```xml
//! <ASAP_Annotations>
//!   <Annotations>
//!     <Annotation Name="Annotation 0" Type="Polygon" PartOfGroup="tumor">
//!       <Coordinates>
//!         <Coordinate Order="0" X="10400.5" Y="2011" />
//!         ...
//! ```
//!
//! Coordinates are level-0 pixels. Class `0` is background; every distinct
//! `PartOfGroup` gets the next class id in order of first appearance.

use crate::wsi::PatchError;
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use rand::Rng;
use std::path::Path;
use tracing::debug;

/// Background class id
pub const BACKGROUND_CLASS: u32 = 0;

/// Closed polygon in level-0 pixel coordinates
#[derive(Debug, Clone, PartialEq)]
pub struct Polygon {
    pub points: Vec<(f64, f64)>,
}

impl Polygon {
    pub fn new(points: Vec<(f64, f64)>) -> Self {
        Self { points }
    }

    /// Axis-aligned bounds as (min_x, min_y, max_x, max_y)
    pub fn bounds(&self) -> (f64, f64, f64, f64) {
        self.points.iter().fold(
            (f64::INFINITY, f64::INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY),
            |(x0, y0, x1, y1), &(x, y)| (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
        )
    }

    /// Shoelace area
    pub fn area(&self) -> f64 {
        let n = self.points.len();
        if n < 3 {
            return 0.0;
        }
        let twice: f64 = (0..n)
            .map(|i| {
                let (x1, y1) = self.points[i];
                let (x2, y2) = self.points[(i + 1) % n];
                x1 * y2 - x2 * y1
            })
            .sum();
        twice.abs() / 2.0
    }

    /// Even-odd ray casting
    pub fn contains(&self, x: f64, y: f64) -> bool {
        let n = self.points.len();
        if n < 3 {
            return false;
        }
        let mut inside = false;
        let mut j = n - 1;
        for i in 0..n {
            let (xi, yi) = self.points[i];
            let (xj, yj) = self.points[j];
            if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
                inside = !inside;
            }
            j = i;
        }
        inside
    }

    /// Rejection-sample a point inside the polygon
    pub fn random_point<R: Rng + ?Sized>(&self, rng: &mut R, attempts: usize) -> Option<(f64, f64)> {
        let (x0, y0, x1, y1) = self.bounds();
        if !(x1 > x0 && y1 > y0) {
            return None;
        }
        (0..attempts)
            .map(|_| (rng.gen_range(x0..x1), rng.gen_range(y0..y1)))
            .find(|&(x, y)| self.contains(x, y))
    }
}

/// One labelled region
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    pub name: String,
    pub group: String,
    pub class_id: u32,
    pub polygon: Polygon,
}

/// All regions of a slide
#[derive(Debug, Clone, Default)]
pub struct AnnotationSet {
    annotations: Vec<Annotation>,
    groups: Vec<String>,
}

impl AnnotationSet {
    /// Read and parse an ASAP XML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, PatchError> {
        let path = path.as_ref();
        let xml = std::fs::read_to_string(path).map_err(|e| PatchError::Annotation {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::parse(&xml).map_err(|e| PatchError::Annotation {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Parse ASAP XML text
    pub fn parse(xml: &str) -> anyhow::Result<Self> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut set = AnnotationSet::default();
        let mut current: Option<(String, String)> = None;
        let mut coords: Vec<(i64, f64, f64)> = Vec::new();

        loop {
            match reader.read_event()? {
                Event::Start(e) if e.name().as_ref() == b"Annotation" => {
                    current = Some(annotation_header(&e)?);
                    coords.clear();
                }
                Event::Empty(e) if e.name().as_ref() == b"Annotation" => {
                    debug!("Skipping annotation without coordinates");
                }
                Event::Start(e) | Event::Empty(e) if e.name().as_ref() == b"Coordinate" => {
                    if current.is_some() {
                        coords.push(coordinate(&e, coords.len() as i64)?);
                    }
                }
                Event::End(e) if e.name().as_ref() == b"Annotation" => {
                    if let Some((name, group)) = current.take() {
                        coords.sort_by_key(|&(order, _, _)| order);
                        let points = coords.iter().map(|&(_, x, y)| (x, y)).collect::<Vec<_>>();
                        if points.len() < 3 {
                            debug!("Annotation '{}' has {} points, skipped", name, points.len());
                            continue;
                        }
                        set.push(name, group, Polygon::new(points));
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        Ok(set)
    }

    fn push(&mut self, name: String, group: String, polygon: Polygon) {
        let class_id = match self.groups.iter().position(|g| *g == group) {
            Some(idx) => idx as u32 + 1,
            None => {
                self.groups.push(group.clone());
                self.groups.len() as u32
            }
        };
        self.annotations.push(Annotation {
            name,
            group,
            class_id,
            polygon,
        });
    }

    /// Distinct group labels, indexed by `class_id - 1`
    pub fn labels(&self) -> &[String] {
        &self.groups
    }

    pub fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }

    pub fn is_empty(&self) -> bool {
        self.annotations.is_empty()
    }

    /// Regions of one class
    pub fn of_class(&self, class_id: u32) -> impl Iterator<Item = &Annotation> {
        self.annotations.iter().filter(move |a| a.class_id == class_id)
    }

    /// Class at a level-0 point; the last matching region wins
    pub fn class_at(&self, x: f64, y: f64) -> u32 {
        self.annotations
            .iter()
            .rev()
            .find(|a| a.polygon.contains(x, y))
            .map(|a| a.class_id)
            .unwrap_or(BACKGROUND_CLASS)
    }

    /// Pick a region of `class_id` with probability proportional to its area
    pub fn choose_by_area<R: Rng + ?Sized>(&self, class_id: u32, rng: &mut R) -> Option<&Annotation> {
        let candidates: Vec<&Annotation> = self.of_class(class_id).collect();
        let total: f64 = candidates.iter().map(|a| a.polygon.area()).sum();
        if candidates.is_empty() || total <= 0.0 {
            return None;
        }
        let mut pick = rng.gen_range(0.0..total);
        for annotation in &candidates {
            let area = annotation.polygon.area();
            if pick < area {
                return Some(annotation);
            }
            pick -= area;
        }
        candidates.last().copied()
    }
}

fn annotation_header(e: &BytesStart) -> anyhow::Result<(String, String)> {
    let mut name = String::new();
    let mut group = String::from("None");
    for attr in e.attributes() {
        let attr = attr?;
        match attr.key.as_ref() {
            b"Name" => name = attr.unescape_value()?.into_owned(),
            b"PartOfGroup" => group = attr.unescape_value()?.into_owned(),
            _ => {}
        }
    }
    Ok((name, group))
}

fn coordinate(e: &BytesStart, fallback_order: i64) -> anyhow::Result<(i64, f64, f64)> {
    let mut order = fallback_order;
    let mut x = None;
    let mut y = None;
    for attr in e.attributes() {
        let attr = attr?;
        let value = attr.unescape_value()?;
        match attr.key.as_ref() {
            b"Order" => order = value.trim().parse().unwrap_or(fallback_order),
            b"X" => x = Some(parse_number(&value)?),
            b"Y" => y = Some(parse_number(&value)?),
            _ => {}
        }
    }
    match (x, y) {
        (Some(x), Some(y)) => Ok((order, x, y)),
        _ => anyhow::bail!("Coordinate missing X or Y"),
    }
}

// Some ASAP exports use a decimal comma
fn parse_number(value: &str) -> anyhow::Result<f64> {
    let normalized = value.trim().replace(',', ".");
    normalized
        .parse::<f64>()
        .map_err(|e| anyhow::anyhow!("Invalid coordinate '{}': {}", value, e))
}
