//! Functional coverage: named coverpoints and crosses of coverpoints, reported as a table
//! and exported as a hierarchical XML document.

use prettytable::{Cell, Row, Table};
use rustc_hash::FxHashMap;
use std::path::Path;
use xml::writer::{EmitterConfig, EventWriter, XmlEvent};

use crate::monitor::{Phase, PhaseCallback};
use crate::prelude::*;

#[derive(Debug, Clone)]
struct CoverItem {
    name: String,
    bins: Vec<String>,
    hits: Vec<u64>,
}

impl CoverItem {
    fn new(name: &str, bins: Vec<String>) -> Self {
        let hits = vec![0; bins.len()];
        Self {
            name: name.to_string(),
            bins,
            hits,
        }
    }
    fn point<B: ToString>(name: &str, bins: impl IntoIterator<Item = B>) -> Self {
        Self::new(name, bins.into_iter().map(|b| b.to_string()).collect())
    }

    /// Cross product of the bins of `points`, labelled `(x, y)`.
    fn cross(name: &str, points: &[&CoverItem]) -> Self {
        let mut combos: Vec<Vec<&str>> = vec![Vec::new()];
        for point in points {
            combos = combos
                .iter()
                .flat_map(|prefix| {
                    point.bins.iter().map(move |bin| {
                        let mut combo = prefix.clone();
                        combo.push(bin.as_str());
                        combo
                    })
                })
                .collect();
        }
        Self::new(name, combos.iter().map(|c| cross_label(c)).collect())
    }

    fn size(&self) -> usize {
        self.bins.len()
    }
    fn covered(&self) -> usize {
        self.hits.iter().filter(|&&h| h > 0).count()
    }
}

fn percentage(covered: usize, size: usize) -> f64 {
    if size == 0 {
        0.0
    } else {
        covered as f64 * 100.0 / size as f64
    }
}

fn cross_label(bins: &[&str]) -> String {
    format!("({})", bins.join(", "))
}

/// Coverage items by dotted name, e.g. `top.cross.ab`.
#[derive(Debug, Default)]
pub struct CoverageDb {
    items: Vec<CoverItem>,
    index: FxHashMap<String, usize>,
}

impl CoverageDb {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&mut self, item: CoverItem) {
        match self.index.get(&item.name) {
            Some(&i) => self.items[i] = item,
            None => {
                self.index.insert(item.name.clone(), self.items.len());
                self.items.push(item);
            }
        }
    }

    fn item(&self, name: &str) -> Option<&CoverItem> {
        self.index.get(name).map(|&i| &self.items[i])
    }

    pub fn add_point<B: ToString>(&mut self, name: &str, bins: impl IntoIterator<Item = B>) {
        self.insert(CoverItem::point(name, bins));
    }

    /// Add the cross product of the bins of existing coverpoints `items`.
    pub fn add_cross(&mut self, name: &str, items: &[&str]) -> SimpleResult<()> {
        let points = items
            .iter()
            .map(|item| {
                self.item(item)
                    .ok_or_else(|| TbError::UnknownCoverItem(item.to_string()))
            })
            .collect::<SimpleResult<Vec<_>>>()?;
        let cross = CoverItem::cross(name, &points);
        self.insert(cross);
        Ok(())
    }

    /// Count a hit of `bin`. Returns false if there is no such item or bin.
    pub fn sample(&mut self, name: &str, bin: &str) -> bool {
        let Some(&i) = self.index.get(name) else {
            return false;
        };
        let item = &mut self.items[i];
        match item.bins.iter().position(|b| b == bin) {
            Some(pos) => {
                item.hits[pos] += 1;
                true
            }
            None => false,
        }
    }

    pub fn sample_cross(&mut self, name: &str, bins: &[&str]) -> bool {
        self.sample(name, &cross_label(bins))
    }

    pub fn hits(&self, name: &str, bin: &str) -> Option<u64> {
        let item = self.item(name)?;
        let pos = item.bins.iter().position(|b| b == bin)?;
        Some(item.hits[pos])
    }

    /// `(covered bins, total bins)` of an item.
    pub fn coverage(&self, name: &str) -> Option<(usize, usize)> {
        self.item(name).map(|item| (item.covered(), item.size()))
    }

    pub fn cover_percentage(&self, name: &str) -> Option<f64> {
        self.coverage(name).map(|(c, s)| percentage(c, s))
    }

    pub fn report(&self, with_bins: bool) -> Table {
        let mut table = Table::new();
        table.set_titles(Row::new(
            ["ITEM", "SIZE", "COVERED", "COVERAGE (%)"]
                .iter()
                .map(|t| Cell::new(t))
                .collect(),
        ));
        for item in &self.items {
            table.add_row(Row::new(vec![
                Cell::new(&item.name),
                Cell::new(&item.size().to_string()),
                Cell::new(&item.covered().to_string()),
                Cell::new(&format!("{:.2}", percentage(item.covered(), item.size()))),
            ]));
            if with_bins {
                for (bin, hits) in item.bins.iter().zip(&item.hits) {
                    table.add_row(Row::new(vec![
                        Cell::new(&format!("  BIN {}", bin)),
                        Cell::new(""),
                        Cell::new(&hits.to_string()),
                        Cell::new(if *hits > 0 { "covered" } else { "" }),
                    ]));
                }
            }
        }
        table
    }

    pub fn to_xml(&self) -> SimpleResult<String> {
        let mut roots = Vec::new();
        for item in &self.items {
            let segments: Vec<&str> = item.name.split('.').collect();
            XmlNode::insert(&mut roots, &segments, 0, item);
        }
        let mut writer = EmitterConfig::new()
            .perform_indent(true)
            .create_writer(Vec::new());
        for root in &roots {
            root.write(&mut writer)?;
        }
        Ok(String::from_utf8_lossy(&writer.into_inner()).into_owned())
    }

    pub fn export_to_xml(&self, path: &Path) -> SimpleResult<()> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(path, self.to_xml()?)?;
        Ok(())
    }
}

struct XmlNode<'a> {
    segment: &'a str,
    abs_name: String,
    item: Option<&'a CoverItem>,
    children: Vec<XmlNode<'a>>,
}

impl<'a> XmlNode<'a> {
    fn insert(nodes: &mut Vec<XmlNode<'a>>, segments: &[&'a str], depth: usize, item: &'a CoverItem) {
        let segment = segments[depth];
        let pos = match nodes.iter().position(|n| n.segment == segment) {
            Some(pos) => pos,
            None => {
                nodes.push(XmlNode {
                    segment,
                    abs_name: segments[..=depth].join("."),
                    item: None,
                    children: Vec::new(),
                });
                nodes.len() - 1
            }
        };
        if depth + 1 == segments.len() {
            nodes[pos].item = Some(item);
        } else {
            XmlNode::insert(&mut nodes[pos].children, segments, depth + 1, item);
        }
    }

    // parents aggregate the bins of everything below them
    fn size(&self) -> usize {
        self.item.map_or(0, |i| i.size()) + self.children.iter().map(|c| c.size()).sum::<usize>()
    }

    fn covered(&self) -> usize {
        self.item.map_or(0, |i| i.covered())
            + self.children.iter().map(|c| c.covered()).sum::<usize>()
    }

    fn write<W: std::io::Write>(&self, writer: &mut EventWriter<W>) -> xml::writer::Result<()> {
        let (size, covered) = (self.size(), self.covered());
        let size_attr = size.to_string();
        let covered_attr = covered.to_string();
        let percentage_attr = format!("{:.2}", percentage(covered, size));
        writer.write(
            XmlEvent::start_element(self.segment)
                .attr("abs_name", &self.abs_name)
                .attr("size", &size_attr)
                .attr("coverage", &covered_attr)
                .attr("cover_percentage", &percentage_attr),
        )?;
        if let Some(item) = self.item {
            for (i, (bin, hits)) in item.bins.iter().zip(&item.hits).enumerate() {
                let tag = format!("bin{}", i);
                let hits = hits.to_string();
                writer.write(
                    XmlEvent::start_element(tag.as_str())
                        .attr("bin", bin)
                        .attr("hits", &hits),
                )?;
                writer.write(XmlEvent::end_element())?;
            }
        }
        for child in &self.children {
            child.write(writer)?;
        }
        writer.write(XmlEvent::end_element())
    }
}

pub const AB: &str = "top.cross.ab";
pub const INPUT_PORT: &str = "top.cross.input";
pub const OUTPUT_PORT: &str = "top.cross.output";
pub const READ_ADDRESS: &str = "top.read_address";

/// Coverage collected by the gated OR testbench. Clones share the same database.
#[derive(Clone, Debug)]
pub struct TbCoverage(TbObj<CoverageDb>);

impl Default for TbCoverage {
    fn default() -> Self {
        Self::new()
    }
}

impl TbCoverage {
    pub fn new() -> Self {
        let phases = [Phase::Idle, Phase::Transaction];
        let a = CoverItem::point("top.a", [0, 1]);
        let b = CoverItem::point("top.b", [0, 1]);
        let previous_write = CoverItem::point("top.inputport.previousWrite", phases);
        let current_write = CoverItem::point("top.inputport.currentWrite", phases);
        let previous_read = CoverItem::point("top.outputport.previousRead", phases);
        let current_read = CoverItem::point("top.outputport.currentRead", phases);
        let crosses = [
            CoverItem::cross(AB, &[&a, &b]),
            CoverItem::cross(INPUT_PORT, &[&previous_write, &current_write]),
            CoverItem::cross(OUTPUT_PORT, &[&previous_read, &current_read]),
        ];
        let read_address = CoverItem::point(READ_ADDRESS, [0, 1, 2, 3]);

        let mut db = CoverageDb::new();
        let points = [
            a,
            b,
            previous_write,
            current_write,
            previous_read,
            current_read,
            read_address,
        ];
        for item in points.into_iter().chain(crosses) {
            db.insert(item);
        }
        Self(TbObj::new(db))
    }

    pub fn ab(&self, a: u32, b: u32) {
        let (a, b) = (a.to_string(), b.to_string());
        self.0.with_mut(|db| {
            db.sample("top.a", &a);
            db.sample("top.b", &b);
            db.sample_cross(AB, &[a.as_str(), b.as_str()]);
        });
    }

    fn port(&self, prefix: &str, kind: &str, cross: &str, previous: Phase, current: Phase) {
        let (prev, cur) = (previous.to_string(), current.to_string());
        self.0.with_mut(|db| {
            db.sample(&format!("{}.previous{}", prefix, kind), &prev);
            db.sample(&format!("{}.current{}", prefix, kind), &cur);
            db.sample_cross(cross, &[prev.as_str(), cur.as_str()]);
        });
    }

    pub fn input_port(&self, previous: Phase, current: Phase) {
        self.port("top.inputport", "Write", INPUT_PORT, previous, current);
    }

    pub fn output_port(&self, previous: Phase, current: Phase) {
        self.port("top.outputport", "Read", OUTPUT_PORT, previous, current);
    }

    pub fn read_address(&self, address: u32) {
        self.0
            .with_mut(|db| db.sample(READ_ADDRESS, &address.to_string()));
    }

    pub fn input_callback(&self) -> PhaseCallback {
        let cov = self.clone();
        Box::new(move |prev, cur| cov.input_port(prev, cur))
    }

    pub fn output_callback(&self) -> PhaseCallback {
        let cov = self.clone();
        Box::new(move |prev, cur| cov.output_port(prev, cur))
    }

    pub fn coverage(&self, name: &str) -> Option<(usize, usize)> {
        self.0.with(|db| db.coverage(name))
    }

    pub fn hits(&self, name: &str, bin: &str) -> Option<u64> {
        self.0.with(|db| db.hits(name, bin))
    }

    pub fn report(&self, with_bins: bool) -> Table {
        self.0.with(|db| db.report(with_bins))
    }

    pub fn export_to_xml(&self, path: &Path) -> SimpleResult<()> {
        self.0.with(|db| db.export_to_xml(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cross_has_product_of_bins() {
        let mut db = CoverageDb::new();
        db.add_point("top.a", [0, 1]);
        db.add_point("top.b", ["x", "y", "z"]);
        db.add_cross("top.cross", &["top.a", "top.b"]).unwrap();
        assert_eq!(db.coverage("top.cross"), Some((0, 6)));
        assert!(db.sample_cross("top.cross", &["1", "z"]));
        assert_eq!(db.hits("top.cross", "(1, z)"), Some(1));
        assert_eq!(db.coverage("top.cross"), Some((1, 6)));
    }

    #[test]
    fn cross_of_unknown_item_fails() {
        let mut db = CoverageDb::new();
        db.add_point("top.a", [0, 1]);
        assert!(matches!(
            db.add_cross("top.cross", &["top.a", "top.nope"]),
            Err(TbError::UnknownCoverItem(name)) if name == "top.nope"
        ));
    }

    #[test]
    fn values_outside_bins_are_ignored() {
        let mut db = CoverageDb::new();
        db.add_point("top.read_address", [0, 1, 2, 3]);
        assert!(!db.sample("top.read_address", "4"));
        assert!(!db.sample("top.unknown", "0"));
        assert!(db.sample("top.read_address", "3"));
        assert!(db.sample("top.read_address", "3"));
        assert_eq!(db.hits("top.read_address", "3"), Some(2));
        assert_eq!(db.cover_percentage("top.read_address"), Some(25.0));
    }

    #[test]
    fn testbench_items() {
        let cov = TbCoverage::new();
        cov.ab(1, 0);
        cov.input_port(Phase::Idle, Phase::Transaction);
        cov.output_port(Phase::Transaction, Phase::Idle);
        cov.read_address(2);
        assert_eq!(cov.coverage(AB), Some((1, 4)));
        assert_eq!(cov.hits(AB, "(1, 0)"), Some(1));
        assert_eq!(cov.hits(INPUT_PORT, "(Idle, Txn)"), Some(1));
        assert_eq!(cov.hits("top.outputport.previousRead", "Txn"), Some(1));
        assert_eq!(cov.coverage(READ_ADDRESS), Some((1, 4)));

        let mut callback = cov.input_callback();
        callback(Phase::Transaction, Phase::Transaction);
        assert_eq!(cov.coverage(INPUT_PORT), Some((2, 4)));
    }

    #[test]
    fn xml_nests_dotted_names() {
        let cov = TbCoverage::new();
        cov.ab(0, 0);
        cov.ab(1, 1);
        let xml = cov.0.with(|db| db.to_xml()).unwrap();
        assert!(xml.starts_with("<?xml"));
        assert!(xml.contains("<top abs_name=\"top\""));
        assert!(xml.contains(
            "<ab abs_name=\"top.cross.ab\" size=\"4\" coverage=\"2\" cover_percentage=\"50.00\">"
        ));
        assert!(xml.contains("<bin0 bin=\"(0, 0)\" hits=\"1\""));
        assert!(xml.contains("<read_address abs_name=\"top.read_address\""));
        // opened and closed once
        assert_eq!(xml.matches("<cross ").count(), 1);
        assert_eq!(xml.matches("</cross>").count(), 1);
    }

    #[test]
    fn report_lists_bins_on_request() {
        let cov = TbCoverage::new();
        cov.read_address(0);
        let plain = cov.report(false).to_string();
        let detailed = cov.report(true).to_string();
        assert!(plain.contains("top.read_address"));
        assert!(!plain.contains("BIN"));
        assert!(detailed.contains("BIN (Idle, Txn)"));
        assert!(detailed.lines().count() > plain.lines().count());
    }

    #[test]
    fn export_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("coverage.xml");
        TbCoverage::new().export_to_xml(&path).unwrap();
        let xml = std::fs::read_to_string(path).unwrap();
        assert!(xml.contains("top.cross.output"));
    }

    #[test]
    fn escapes_bin_labels() {
        let mut db = CoverageDb::new();
        db.add_point("top.op", ["a & b"]);
        let xml = db.to_xml().unwrap();
        assert!(xml.contains("bin=\"a &amp; b\""));
    }
}
