use super::{ClassificationTables, ProductGroup};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum TablesError {
    #[error("failed to read classification tables: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed classification tables: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("unknown product group '{0}'")]
    UnknownGroup(String),

    #[error("'Others' is the fallback group and cannot have members")]
    OthersHasMembers,
}

/// Units-per-case factors keyed by product number.
const CONVERSIONS: &[(&str, &str)] = &[
    ("P10002", "40"),
    ("P10028", "40"),
    ("P10019", "40"),
    ("P10027", "40"),
    ("P5020", "40"),
    ("P5017", "30"),
    ("P5007", "40"),
    ("P10008", "40"),
    ("P10018", "20"),
    ("P16032", "20"),
    ("P19149", "32"),
    ("P19013", "20"),
    ("P19909", "30"),
    ("P19055", "40"),
    ("P19048", "50"),
    ("P19186", "20"),
    ("P19016", "50"),
    ("P19045", "10"),
    ("P19085", "30"),
    ("P19169", "18"),
    ("P19910", "11"),
    ("P19187", "4"),
    ("P19147", "12"),
    ("P19046", "8"),
    ("P1079", "400"),
    ("P1102", "30"),
    ("P1260", "100"),
    ("P1112", "50"),
    ("P1107", "35"),
    ("P1001", "200"),
    ("P1004", "60"),
    ("P1129", "50"),
    ("P1684", "125"),
    ("P19054", "20"),
    ("P1249", "32"),
    ("P2002", "30"),
    ("P1404", "40"),
    ("P1295", "35"),
    ("P1792", "40"),
    ("P1580", "40"),
    ("P1116", "4.8"),
    ("P1158", "6"),
    ("P1272", "50"),
    ("P19052", "6"),
    ("P1093", "12"),
    ("P1268", "40"),
    ("P1131", "4"),
    ("P1233", "40"),
    // beverages
    ("P25980", "32"),
    ("P25911", "24"),
    ("P25973", "24"),
    ("P25908", "24"),
    ("P25353", "50"),
    ("P25422", "12"),
    ("P25421", "12"),
    ("P25424", "12"),
    ("P25423", "12"),
    ("P25004", "5"),
    ("P25003", "5"),
    ("P25005", "5"),
    ("P25027", "5"),
    ("P25943", "5"),
    ("P25346", "5"),
    ("P25006", "5"),
    ("P25933", "5"),
    ("P25077", "5"),
    ("P25244", "5"),
    ("P25403", "24"),
    // packaging
    ("P35432", "7200"),
    ("P35048", "2000"),
    ("P35719", "200"),
    ("P35213", "2000"),
    ("P35509", "504"),
    ("P36029", "250"),
    ("P35508", "504"),
    ("P35149", "1000"),
    ("P35130", "450"),
    ("P35062", "2000"),
    ("P35580", "3000"),
    ("P35275", "1000"),
    ("P35542", "1500"),
    ("P35040", "1000"),
    ("P35094", "500"),
    ("P35406", "1000"),
    ("P35081", "450"),
    ("P35268", "750"),
    ("P35380", "600"),
    ("P35634", "300"),
    ("P35659", "1000"),
    ("P35065", "1000"),
    ("P35126", "450"),
    ("P35269", "600"),
    // condiment packets
    ("P1124", "1000"),
    ("P1151", "700"),
    ("P1652", "500"),
    ("P1566", "311"),
    ("P23001", "500"),
];

/// Membership sets in priority order.
const GROUPS: &[(ProductGroup, &[&str])] = &[
    (ProductGroup::WifBeef, &["P5007", "P5017", "P5020"]),
    (
        ProductGroup::Wif,
        &["P10002", "P10028", "P10019", "P10027", "P10008", "P10018"],
    ),
    (ProductGroup::Seafood, &["P16032"]),
    (ProductGroup::Appetizers, &["P1260", "P1001", "P1004"]),
    (ProductGroup::Sides, &["P1102", "P1112", "P2002", "P19149"]),
    (
        ProductGroup::SauceCart,
        &[
            "P1093", "P1580", "P1404", "P1233", "P1249", "P1268", "P1107", "P1295", "P1792",
            "P19002",
        ],
    ),
    (
        ProductGroup::Condements,
        &["P1652", "P1566", "P1151", "P1124", "P23001"],
    ),
    (
        ProductGroup::Vegetables,
        &[
            "P19013", "P19016", "P19045", "P19048", "P19054", "P19055", "P19085", "P19147",
            "P19169", "P19186", "P19187", "P19909", "P19910",
        ],
    ),
    (
        ProductGroup::Bibs,
        &[
            "P25003", "P25004", "P25005", "P25006", "P25027", "P25244", "P25346", "P25933",
            "P25943", "P25077",
        ],
    ),
    (
        ProductGroup::Pcb,
        &["P25421", "P25422", "P25423", "P25424", "P25343", "P25341"],
    ),
    (
        ProductGroup::Bottles,
        &[
            "P25908", "P25911", "P25973", "P25980", "P25959", "P25417", "P25403",
        ],
    ),
    (
        ProductGroup::FohPackaging,
        &["P35081", "P35126", "P35130", "P35509", "P35508", "P35719"],
    ),
    (
        ProductGroup::CupsAndLids,
        &[
            "P35149", "P35380", "P35268", "P35269", "P35406", "P35062", "P35065", "P35040",
        ],
    ),
    (
        ProductGroup::PrepArea,
        &["P1158", "P19052", "P1116", "P1129", "P1131", "P1272"],
    ),
    (ProductGroup::Foh, &["P1079", "P35048", "P35213", "P35432"]),
    (ProductGroup::Catering, &["P35659", "P35542"]),
    (ProductGroup::Cub, &["P25353", "P1684"]),
    (ProductGroup::Bags, &["P35522", "P35275", "P36029", "P35521"]),
];

#[derive(Deserialize)]
struct TablesFile {
    #[serde(default)]
    conversions: HashMap<String, String>,
    #[serde(default)]
    groups: Vec<GroupEntry>,
}

#[derive(Deserialize)]
struct GroupEntry {
    name: String,
    products: Vec<String>,
}

impl ClassificationTables {
    /// The tables shipped with the binary.
    pub fn builtin() -> Self {
        let conversions = CONVERSIONS
            .iter()
            .map(|(number, factor)| (number.to_string(), factor.to_string()))
            .collect();
        let groups = GROUPS
            .iter()
            .map(|(group, members)| (*group, members.iter().map(|m| m.to_string()).collect()))
            .collect();
        Self::new(conversions, groups)
    }

    /// Parse tables from TOML:
    ///
    /// ```toml
    /// [conversions]
    /// P10002 = "40"
    ///
    /// [[groups]]
    /// name = "WIF"
    /// products = ["P10002"]
    /// ```
    ///
    /// `[[groups]]` order is the classification priority order.
    pub fn from_toml_str(content: &str) -> Result<Self, TablesError> {
        let file: TablesFile = toml::from_str(content)?;

        let mut groups: Vec<(ProductGroup, HashSet<String>)> = Vec::with_capacity(file.groups.len());
        for entry in file.groups {
            let group: ProductGroup = entry
                .name
                .parse()
                .map_err(|_| TablesError::UnknownGroup(entry.name.clone()))?;
            if group == ProductGroup::Others {
                return Err(TablesError::OthersHasMembers);
            }
            groups.push((group, entry.products.into_iter().collect()));
        }

        Ok(Self::new(file.conversions, groups))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, TablesError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let tables = Self::from_toml_str(&content)?;
        info!(
            path = %path.as_ref().display(),
            conversions = tables.conversion_count(),
            groups = tables.group_count(),
            "Loaded classification tables"
        );
        Ok(tables)
    }
}
