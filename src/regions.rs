// ============================================================================
// REGION TABLE: named, colored classifications referenced by cells
// ============================================================================

use std::collections::BTreeMap;

use image::Rgba;

use crate::error::{EngineError, Result};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Region {
    pub id: i32,
    pub color: Rgba<u8>,
    pub name: String,
}

impl Region {
    pub fn new(id: i32, color: Rgba<u8>, name: impl Into<String>) -> Self {
        Self { id, color, name: name.into() }
    }
}

/// Lookup table keyed by region id.  Entries are only created or removed by
/// explicit calls; painting never touches the table.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RegionTable {
    entries: BTreeMap<i32, Region>,
}

impl RegionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next auto-assigned id: one past the largest id in use, starting at 1.
    /// Once `i32::MAX` is taken the lowest unused positive id is handed out.
    pub fn next_id(&self) -> Option<i32> {
        match self.entries.keys().next_back() {
            None => Some(1),
            Some(&max) if max < 1 => Some(1),
            Some(&max) if max < i32::MAX => Some(max + 1),
            Some(_) => {
                let mut candidate = 1;
                for &id in self.entries.range(1..).map(|(id, _)| id) {
                    if id != candidate {
                        return Some(candidate);
                    }
                    candidate = id.checked_add(1)?;
                }
                Some(candidate)
            }
        }
    }

    /// Add a region with an auto-assigned id.  Never replaces an entry.
    pub fn add(&mut self, color: Rgba<u8>, name: impl Into<String>) -> Result<i32> {
        let id = self.next_id().ok_or(EngineError::RegionIdsExhausted)?;
        self.entries.insert(id, Region::new(id, color, name));
        Ok(id)
    }

    /// Add a region with an operator-chosen id.
    pub fn insert(&mut self, region: Region) -> Result<()> {
        if region.id == 0 || self.entries.contains_key(&region.id) {
            return Err(EngineError::DuplicateRegionId(region.id));
        }
        self.entries.insert(region.id, region);
        Ok(())
    }

    pub fn remove(&mut self, id: i32) -> Result<Region> {
        self.entries.remove(&id).ok_or(EngineError::UnknownRegion(id))
    }

    pub fn rename(&mut self, id: i32, name: impl Into<String>) -> Result<()> {
        let region = self.entries.get_mut(&id).ok_or(EngineError::UnknownRegion(id))?;
        region.name = name.into();
        Ok(())
    }

    pub fn recolor(&mut self, id: i32, color: Rgba<u8>) -> Result<()> {
        let region = self.entries.get_mut(&id).ok_or(EngineError::UnknownRegion(id))?;
        region.color = color;
        Ok(())
    }

    pub fn get(&self, id: i32) -> Option<&Region> {
        self.entries.get(&id)
    }

    /// First region (lowest id) with exactly this color.
    pub fn find_by_color(&self, color: Rgba<u8>) -> Option<&Region> {
        self.entries.values().find(|r| r.color == color)
    }

    /// Colors shared by more than one region, with the ids sharing each.
    pub fn conflicts(&self) -> Vec<(Rgba<u8>, Vec<i32>)> {
        let mut by_color: BTreeMap<[u8; 4], Vec<i32>> = BTreeMap::new();
        for r in self.entries.values() {
            by_color.entry(r.color.0).or_default().push(r.id);
        }
        by_color
            .into_iter()
            .filter(|(_, ids)| ids.len() > 1)
            .map(|(c, ids)| (Rgba(c), ids))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Region> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_auto_increment_past_explicit_ones() {
        let mut t = RegionTable::new();
        assert_eq!(t.add(Rgba([1, 0, 0, 255]), "a"), Ok(1));
        t.insert(Region::new(10, Rgba([2, 0, 0, 255]), "b")).unwrap();
        assert_eq!(t.add(Rgba([3, 0, 0, 255]), "c"), Ok(11));
    }

    #[test]
    fn add_after_max_id_reuses_lowest_free_id() {
        let mut t = RegionTable::new();
        t.insert(Region::new(i32::MAX, Rgba([0, 0, 255, 255]), "Ocean")).unwrap();
        t.insert(Region::new(1, Rgba([0, 255, 0, 255]), "Plains")).unwrap();

        assert_eq!(t.add(Rgba([200, 150, 0, 255]), "Land"), Ok(2));

        assert_eq!(t.len(), 3);
        assert_eq!(t.get(i32::MAX).unwrap().name, "Ocean");
        assert_eq!(t.get(2).unwrap().name, "Land");
    }

    #[test]
    fn negative_ids_do_not_block_auto_ids() {
        let mut t = RegionTable::new();
        t.insert(Region::new(-5, Rgba([9, 9, 9, 255]), "Legacy")).unwrap();
        assert_eq!(t.add(Rgba([1, 1, 1, 255]), "a"), Ok(1));
    }

    #[test]
    fn duplicate_and_zero_ids_are_rejected() {
        let mut t = RegionTable::new();
        t.insert(Region::new(4, Rgba([0, 0, 0, 255]), "x")).unwrap();
        assert_eq!(t.insert(Region::new(4, Rgba([9, 9, 9, 255]), "y")), Err(EngineError::DuplicateRegionId(4)));
        assert_eq!(t.insert(Region::new(0, Rgba([9, 9, 9, 255]), "z")), Err(EngineError::DuplicateRegionId(0)));
    }

    #[test]
    fn shared_colors_are_reported_as_conflicts() {
        let mut t = RegionTable::new();
        let red = Rgba([255, 0, 0, 255]);
        let a = t.add(red, "a").unwrap();
        t.add(Rgba([0, 255, 0, 255]), "b").unwrap();
        let c = t.add(red, "c").unwrap();
        assert_eq!(t.conflicts(), vec![(red, vec![a, c])]);
    }
}
