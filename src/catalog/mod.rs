// src/catalog/mod.rs

mod rows;
mod tables;

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

pub use rows::parse_product_rows;

/// Commodity group of a product. Variants are listed in classification
/// priority order; `Others` is the fallback and never has a membership set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProductGroup {
    #[serde(rename = "WIF Beef")]
    WifBeef,
    #[serde(rename = "WIF")]
    Wif,
    Seafood,
    Appetizers,
    Sides,
    #[serde(rename = "Sauce Cart")]
    SauceCart,
    Condements,
    Vegetables,
    #[serde(rename = "BIBs")]
    Bibs,
    #[serde(rename = "PCB")]
    Pcb,
    Bottles,
    #[serde(rename = "FoH Packaging")]
    FohPackaging,
    #[serde(rename = "Cups & lids")]
    CupsAndLids,
    #[serde(rename = "Prep Area")]
    PrepArea,
    #[serde(rename = "FoH")]
    Foh,
    Catering,
    Cub,
    Bags,
    Others,
}

impl ProductGroup {
    pub const ALL: [ProductGroup; 19] = [
        ProductGroup::WifBeef,
        ProductGroup::Wif,
        ProductGroup::Seafood,
        ProductGroup::Appetizers,
        ProductGroup::Sides,
        ProductGroup::SauceCart,
        ProductGroup::Condements,
        ProductGroup::Vegetables,
        ProductGroup::Bibs,
        ProductGroup::Pcb,
        ProductGroup::Bottles,
        ProductGroup::FohPackaging,
        ProductGroup::CupsAndLids,
        ProductGroup::PrepArea,
        ProductGroup::Foh,
        ProductGroup::Catering,
        ProductGroup::Cub,
        ProductGroup::Bags,
        ProductGroup::Others,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProductGroup::WifBeef => "WIF Beef",
            ProductGroup::Wif => "WIF",
            ProductGroup::Seafood => "Seafood",
            ProductGroup::Appetizers => "Appetizers",
            ProductGroup::Sides => "Sides",
            ProductGroup::SauceCart => "Sauce Cart",
            ProductGroup::Condements => "Condements",
            ProductGroup::Vegetables => "Vegetables",
            ProductGroup::Bibs => "BIBs",
            ProductGroup::Pcb => "PCB",
            ProductGroup::Bottles => "Bottles",
            ProductGroup::FohPackaging => "FoH Packaging",
            ProductGroup::CupsAndLids => "Cups & lids",
            ProductGroup::PrepArea => "Prep Area",
            ProductGroup::Foh => "FoH",
            ProductGroup::Catering => "Catering",
            ProductGroup::Cub => "Cub",
            ProductGroup::Bags => "Bags",
            ProductGroup::Others => "Others",
        }
    }
}

impl fmt::Display for ProductGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProductGroup {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProductGroup::ALL
            .iter()
            .copied()
            .find(|g| g.as_str() == s)
            .ok_or_else(|| format!("unknown product group '{s}'"))
    }
}

/// One row of the count sheet as it comes out of the row parser, before
/// conversion lookup and group assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedProduct {
    pub product_number: String,
    pub product_name: String,
    pub unit: String,
    pub w38: String,
    pub w39: String,
    pub w40: String,
    pub w41: String,
    pub conversion: String,
}

/// A classified product. Weekly quantities stay as text to keep the sheet's
/// formatting; they are only parsed for anomaly comparison.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductRecord {
    pub product_number: String,
    pub product_name: String,
    pub unit: String,
    pub w38: String,
    pub w39: String,
    pub w40: String,
    pub w41: String,
    #[serde(default)]
    pub conversion: String,
    pub group: ProductGroup,
}

impl ProductRecord {
    pub fn weeks(&self) -> [&str; 4] {
        [&self.w38, &self.w39, &self.w40, &self.w41]
    }
}

/// Static conversion factors and group membership sets. Built once at
/// startup and shared by reference.
#[derive(Debug, Clone)]
pub struct ClassificationTables {
    conversions: HashMap<String, String>,
    groups: Vec<(ProductGroup, HashSet<String>)>,
}

impl ClassificationTables {
    pub fn new(
        conversions: HashMap<String, String>,
        groups: Vec<(ProductGroup, HashSet<String>)>,
    ) -> Self {
        Self {
            conversions,
            groups,
        }
    }

    pub fn conversion_for(&self, product_number: &str) -> Option<&str> {
        self.conversions.get(product_number).map(String::as_str)
    }

    /// First set containing the number wins; `Others` when none does.
    pub fn group_for(&self, product_number: &str) -> ProductGroup {
        self.groups
            .iter()
            .find(|(_, members)| members.contains(product_number))
            .map(|(group, _)| *group)
            .unwrap_or(ProductGroup::Others)
    }

    pub fn classify(&self, product: ParsedProduct) -> ProductRecord {
        let conversion = match self.conversion_for(&product.product_number) {
            Some(c) => c.to_string(),
            None => product.conversion,
        };
        let group = self.group_for(&product.product_number);

        ProductRecord {
            product_number: product.product_number,
            product_name: product.product_name,
            unit: product.unit,
            w38: product.w38,
            w39: product.w39,
            w40: product.w40,
            w41: product.w41,
            conversion,
            group,
        }
    }

    pub fn classify_all(&self, products: Vec<ParsedProduct>) -> Vec<ProductRecord> {
        products.into_iter().map(|p| self.classify(p)).collect()
    }

    pub fn conversion_count(&self) -> usize {
        self.conversions.len()
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::rows::parse_product_row;

    fn parsed(number: &str) -> ParsedProduct {
        ParsedProduct {
            product_number: number.to_string(),
            product_name: "Test".to_string(),
            unit: "CS".to_string(),
            w38: "1".to_string(),
            w39: "1".to_string(),
            w40: "1".to_string(),
            w41: "1".to_string(),
            conversion: String::new(),
        }
    }

    #[test]
    fn test_orange_chicken_classification() {
        let row = "P10002 Chicken, Orange Dark Battered K- LB 20.09 20.41 18.42 18.59";
        let product = parse_product_row(row).unwrap();
        let record = ClassificationTables::builtin().classify(product);
        assert_eq!(record.conversion, "40");
        assert_eq!(record.group, ProductGroup::Wif);
        assert_eq!(record.product_name, "Chicken, Orange Dark Battered K-");
    }

    #[test]
    fn test_unknown_product_falls_back_to_others() {
        let record = ClassificationTables::builtin().classify(parsed("P99999999"));
        assert_eq!(record.group, ProductGroup::Others);
        assert_eq!(record.conversion, "");
    }

    #[test]
    fn test_existing_conversion_kept_when_not_in_table() {
        let mut p = parsed("P99999999");
        p.conversion = "12".to_string();
        let record = ClassificationTables::builtin().classify(p);
        assert_eq!(record.conversion, "12");
    }

    #[test]
    fn test_table_conversion_overrides_existing() {
        let mut p = parsed("P1079");
        p.conversion = "1".to_string();
        let record = ClassificationTables::builtin().classify(p);
        assert_eq!(record.conversion, "400");
        assert_eq!(record.group, ProductGroup::Foh);
    }

    #[test]
    fn test_first_matching_set_wins() {
        let groups = vec![
            (ProductGroup::Sides, HashSet::from(["P1".to_string()])),
            (ProductGroup::Bags, HashSet::from(["P1".to_string(), "P2".to_string()])),
        ];
        let tables = ClassificationTables::new(HashMap::new(), groups);
        assert_eq!(tables.group_for("P1"), ProductGroup::Sides);
        assert_eq!(tables.group_for("P2"), ProductGroup::Bags);
        assert_eq!(tables.group_for("P3"), ProductGroup::Others);
    }

    #[test]
    fn test_group_names_round_trip_through_serde() {
        for group in ProductGroup::ALL {
            let json = serde_json::to_string(&group).unwrap();
            assert_eq!(json, format!("\"{}\"", group.as_str()));
            assert_eq!(group.as_str().parse::<ProductGroup>().unwrap(), group);
        }
        assert!("Beverages".parse::<ProductGroup>().is_err());
    }

    #[test]
    fn test_classify_all_keeps_order() {
        let tables = ClassificationTables::builtin();
        let out = tables.classify_all(vec![parsed("P5007"), parsed("P16032"), parsed("P1")]);
        let groups: Vec<_> = out.iter().map(|r| r.group).collect();
        assert_eq!(
            groups,
            vec![ProductGroup::WifBeef, ProductGroup::Seafood, ProductGroup::Others]
        );
    }

    #[test]
    fn test_record_json_shape() {
        let record = ClassificationTables::builtin().classify(parsed("P25003"));
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["productNumber"], "P25003");
        assert_eq!(json["group"], "BIBs");
        assert_eq!(json["conversion"], "5");
        assert!(json.get("product_number").is_none());
    }
}
