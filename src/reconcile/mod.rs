pub mod cost_items;
pub mod units;

pub use cost_items::CostItemDictionaryMap;
pub use units::CanonicalUnitMap;
