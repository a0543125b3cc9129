use super::ParsedProduct;
use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

/// `P<digits> <name> <UNIT> <w38> <w39> <w40> <w41>`; the name is matched
/// lazily so the unit is the first all-caps token followed by four numbers.
static PRODUCT_ROW: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(P\d+)\s+(.+?)\s+([A-Z-]+)\s+(\d+\.?\d*|\.\d+)\s+(\d+\.?\d*|\.\d+)\s+(\d+\.?\d*|\.\d+)\s+(\d+\.?\d*|\.\d+)(?:\s|$)",
    )
    .expect("product row pattern is valid")
});

/// Rows accepted by the parser plus the raw rows it dropped.
#[derive(Debug, Default)]
pub struct RowParse {
    pub products: Vec<ParsedProduct>,
    pub skipped: Vec<String>,
}

pub fn parse_product_row(row: &str) -> Option<ParsedProduct> {
    let cap = PRODUCT_ROW.captures(row)?;
    Some(ParsedProduct {
        product_number: cap[1].to_string(),
        product_name: cap[2].trim().to_string(),
        unit: cap[3].to_string(),
        w38: cap[4].to_string(),
        w39: cap[5].to_string(),
        w40: cap[6].to_string(),
        w41: cap[7].to_string(),
        conversion: String::new(),
    })
}

/// Parse every row in order. Header, footer and page-break fragments do not
/// match and end up in `skipped`.
pub fn parse_product_rows<S: AsRef<str>>(rows: &[S]) -> RowParse {
    let mut out = RowParse::default();
    for row in rows {
        let row = row.as_ref();
        match parse_product_row(row) {
            Some(product) => out.products.push(product),
            None => {
                debug!(row = %row, "Row does not match product pattern");
                out.skipped.push(row.to_string());
            }
        }
    }
    out
}
