//! Namespace fallback table shared by negotiation and parsing.
//!
//! Servers disagree about which namespace their capability elements live in.
//! Rather than guessing per call site, every lookup walks the ordered list
//! below for its protocol family.

use crate::model::ServiceFamily;

pub const WFS_2_0: &str = "http://www.opengis.net/wfs/2.0";
pub const WFS_LEGACY: &str = "http://www.opengis.net/wfs";
pub const WMS: &str = "http://www.opengis.net/wms";
pub const XML_SCHEMA: &str = "http://www.w3.org/2001/XMLSchema";

/// One entry of the fallback table. `None` means "no namespace".
pub type NamespaceVariant = Option<&'static str>;

const WFS_LAYER_VARIANTS: &[NamespaceVariant] = &[Some(WFS_2_0), Some(WFS_LEGACY), None];
const WMS_LAYER_VARIANTS: &[NamespaceVariant] = &[Some(WMS), None];

const WFS_FIELD_VARIANTS: &[NamespaceVariant] = &[None, Some(WFS_2_0), Some(WFS_LEGACY)];
const WMS_FIELD_VARIANTS: &[NamespaceVariant] = &[None, Some(WMS)];

/// Lookup rules for one protocol family.
#[derive(Debug, Clone, Copy)]
pub struct NamespaceTable {
    /// Local name of the repeated layer element.
    pub layer_element: &'static str,
    /// Search order for the layer element: versioned, legacy, none.
    pub layer_variants: &'static [NamespaceVariant],
    /// Search order for `Name`/`Title`/`Abstract` children: unqualified
    /// first, then each known alias.
    pub field_variants: &'static [NamespaceVariant],
}

impl NamespaceTable {
    pub fn for_family(family: ServiceFamily) -> Self {
        match family {
            ServiceFamily::Wfs => Self {
                layer_element: "FeatureType",
                layer_variants: WFS_LAYER_VARIANTS,
                field_variants: WFS_FIELD_VARIANTS,
            },
            ServiceFamily::Wms => Self {
                layer_element: "Layer",
                layer_variants: WMS_LAYER_VARIANTS,
                field_variants: WMS_FIELD_VARIANTS,
            },
        }
    }
}
