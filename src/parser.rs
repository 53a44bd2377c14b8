use tracing::{debug, info, warn};

use crate::model::{AttributeDescriptor, LayerCatalog, LayerDescriptor, ServiceFamily};
use crate::namespace::{NamespaceTable, XML_SCHEMA};
use crate::xml::{Element, XmlDocument};

/// Returns the repeated layer elements of a capability document.
///
/// Variants are tried in table order and the first one that yields at least
/// one element wins; elements of later variants are not merged in.
pub fn find_layer_elements(document: &XmlDocument, family: ServiceFamily) -> Vec<&Element> {
    let table = NamespaceTable::for_family(family);
    for variant in table.layer_variants {
        let found: Vec<&Element> = document
            .root()
            .find_all(*variant, table.layer_element)
            .collect();
        if !found.is_empty() {
            debug!(
                "Found {} <{}> elements in namespace {:?}",
                found.len(),
                table.layer_element,
                variant
            );
            return found;
        }
    }
    Vec::new()
}

/// True when the document declares at least one layer under any known
/// namespace variant.
pub fn has_layer_elements(document: &XmlDocument, family: ServiceFamily) -> bool {
    !find_layer_elements(document, family).is_empty()
}

/// Text of the first direct child `local_name` found while walking the field
/// variants. Empty text counts as absent.
fn field_text<'a>(element: &'a Element, table: &NamespaceTable, local_name: &str) -> Option<&'a str> {
    table
        .field_variants
        .iter()
        .find_map(|variant| element.child(*variant, local_name))
        .map(Element::text)
        .filter(|text| !text.is_empty())
}

/// Schema element declarations inside a feature type, as `(name, type)`.
fn schema_attributes(feature_type: &Element) -> Vec<AttributeDescriptor> {
    feature_type
        .find_all(Some(XML_SCHEMA), "element")
        .filter_map(|element| {
            let name = element.attribute("name")?;
            let type_name = element
                .attribute("type")
                .map(|t| t.rsplit(':').next().unwrap_or(t))
                .unwrap_or_default();
            Some(AttributeDescriptor {
                name: name.to_string(),
                type_name: type_name.to_string(),
            })
        })
        .collect()
}

/// Extracts the namespace -> layer mapping from a capability document.
///
/// An empty catalog is how "no layers found" is reported; the caller decides
/// whether that is an error. Duplicated qualified names are last-wins.
pub fn parse_capabilities(document: &XmlDocument, family: ServiceFamily) -> LayerCatalog {
    let table = NamespaceTable::for_family(family);
    let mut catalog = LayerCatalog::new();

    for element in find_layer_elements(document, family) {
        let Some(name) = field_text(element, &table, "Name") else {
            match field_text(element, &table, "Title") {
                Some(title) => warn!("Skipping unnamed {} '{}'", table.layer_element, title),
                None => warn!("Skipping unnamed {}", table.layer_element),
            }
            continue;
        };

        let title = field_text(element, &table, "Title");
        let abstract_text = field_text(element, &table, "Abstract");
        let mut layer = LayerDescriptor::new(name, title, abstract_text);
        if family == ServiceFamily::Wfs {
            layer.attributes = schema_attributes(element);
        }

        debug!(
            "Layer {} (title: '{}', {} attributes)",
            layer.name,
            layer.title,
            layer.attributes.len()
        );
        if let Some(previous) = catalog.insert(layer) {
            warn!("Duplicate layer name {}; keeping the later entry", previous.name);
        }
    }

    info!(
        "Parsed {} {} layers in {} namespaces",
        catalog.len(),
        family,
        catalog.namespaces().count()
    );
    catalog
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::namespace::{WFS_2_0, WFS_LEGACY, WMS};
    use proptest::prelude::*;

    fn wfs_document(namespace: Option<&str>, feature_types: &[(&str, Option<&str>)]) -> String {
        let (root_attr, prefix) = match namespace {
            Some(uri) => (format!(r#" xmlns:wfs="{}""#, uri), "wfs:"),
            None => (String::new(), ""),
        };
        let mut body = String::new();
        for (name, title) in feature_types {
            body.push_str(&format!("<{p}FeatureType><{p}Name>{}</{p}Name>", name, p = prefix));
            if let Some(title) = title {
                body.push_str(&format!("<{p}Title>{}</{p}Title>", title, p = prefix));
            }
            body.push_str(&format!("</{p}FeatureType>", p = prefix));
        }
        format!(
            r#"<{p}WFS_Capabilities{}><{p}FeatureTypeList>{}</{p}FeatureTypeList></{p}WFS_Capabilities>"#,
            root_attr,
            body,
            p = prefix
        )
    }

    fn parse(xml: &str, family: ServiceFamily) -> LayerCatalog {
        let document = XmlDocument::parse(xml.as_bytes()).unwrap();
        parse_capabilities(&document, family)
    }

    #[test]
    fn test_wfs_2_0_feature_types() {
        let xml = wfs_document(Some(WFS_2_0), &[("a:X", Some("Parcels")), ("b:Y", None)]);
        let catalog = parse(&xml, ServiceFamily::Wfs);

        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.get("a", "X").unwrap().title, "Parcels");
        assert_eq!(catalog.get("b", "Y").unwrap().title, "Y");
        assert_eq!(catalog.get_qualified("b:Y").unwrap().local_name, "Y");
    }

    #[test]
    fn test_unprefixed_layer_goes_to_default_namespace() {
        let xml = wfs_document(None, &[("Bar", None)]);
        let catalog = parse(&xml, ServiceFamily::Wfs);
        let layer = catalog.get("default", "Bar").unwrap();
        assert_eq!(layer.name, "Bar");
        assert_eq!(layer.abstract_text, "");
    }

    #[test]
    fn test_nameless_feature_type_is_skipped() {
        let xml = format!(
            r#"<wfs:WFS_Capabilities xmlns:wfs="{}">
                <wfs:FeatureType><wfs:Title>orphan</wfs:Title></wfs:FeatureType>
                <wfs:FeatureType><wfs:Name> </wfs:Name></wfs:FeatureType>
                <wfs:FeatureType><wfs:Name>ns:Kept</wfs:Name></wfs:FeatureType>
            </wfs:WFS_Capabilities>"#,
            WFS_LEGACY
        );
        let catalog = parse(&xml, ServiceFamily::Wfs);
        assert_eq!(catalog.len(), 1);
        assert!(catalog.get("ns", "Kept").is_some());
    }

    #[test]
    fn test_unqualified_children_inside_namespaced_feature_type() {
        let xml = format!(
            r#"<wfs:WFS_Capabilities xmlns:wfs="{}">
                <wfs:FeatureType><Name>ns:A</Name><Title>Alpha</Title><Abstract>first</Abstract></wfs:FeatureType>
            </wfs:WFS_Capabilities>"#,
            WFS_2_0
        );
        let catalog = parse(&xml, ServiceFamily::Wfs);
        let layer = catalog.get("ns", "A").unwrap();
        assert_eq!(layer.title, "Alpha");
        assert_eq!(layer.abstract_text, "first");
    }

    #[test]
    fn test_versioned_namespace_wins_over_unqualified() {
        let xml = format!(
            r#"<wfs:WFS_Capabilities xmlns:wfs="{}">
                <wfs:FeatureType><wfs:Name>v:Versioned</wfs:Name></wfs:FeatureType>
                <extra><FeatureType><Name>u:Plain</Name></FeatureType></extra>
            </wfs:WFS_Capabilities>"#,
            WFS_2_0
        );
        let catalog = parse(&xml, ServiceFamily::Wfs);
        assert_eq!(catalog.len(), 1);
        assert!(catalog.get("v", "Versioned").is_some());
    }

    #[test]
    fn test_duplicate_names_are_last_wins() {
        let xml = wfs_document(Some(WFS_2_0), &[("ns:A", Some("old")), ("ns:A", Some("new"))]);
        let catalog = parse(&xml, ServiceFamily::Wfs);
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.get("ns", "A").unwrap().title, "new");
    }

    #[test]
    fn test_wfs_schema_attributes() {
        let xml = format!(
            r#"<wfs:WFS_Capabilities xmlns:wfs="{}" xmlns:xsd="{}">
                <wfs:FeatureType>
                    <wfs:Name>ns:Roads</wfs:Name>
                    <xsd:complexType><xsd:sequence>
                        <xsd:element name="geom" type="gml:LineStringPropertyType"/>
                        <xsd:element name="lanes" type="xsd:int"/>
                        <xsd:element name="note"/>
                        <xsd:element ref="gml:_Feature"/>
                    </xsd:sequence></xsd:complexType>
                </wfs:FeatureType>
            </wfs:WFS_Capabilities>"#,
            WFS_2_0, XML_SCHEMA
        );
        let catalog = parse(&xml, ServiceFamily::Wfs);
        let attributes = &catalog.get("ns", "Roads").unwrap().attributes;
        let pairs: Vec<(&str, &str)> = attributes
            .iter()
            .map(|a| (a.name.as_str(), a.type_name.as_str()))
            .collect();
        assert_eq!(
            pairs,
            vec![("geom", "LineStringPropertyType"), ("lanes", "int"), ("note", "")]
        );
    }

    #[test]
    fn test_wms_1_3_nested_layers() {
        let xml = format!(
            r#"<WMS_Capabilities xmlns="{}" version="1.3.0">
                <Capability>
                    <Layer>
                        <Title>Root without name</Title>
                        <Layer><Name>topo:Contours</Name><Title>Contours</Title><Abstract>10 m</Abstract></Layer>
                        <Layer><Name>Orthophoto</Name></Layer>
                    </Layer>
                </Capability>
            </WMS_Capabilities>"#,
            WMS
        );
        let catalog = parse(&xml, ServiceFamily::Wms);
        assert_eq!(catalog.len(), 2);
        let contours = catalog.get("topo", "Contours").unwrap();
        assert_eq!(contours.abstract_text, "10 m");
        assert!(contours.attributes.is_empty());
        assert_eq!(catalog.get("default", "Orthophoto").unwrap().title, "Orthophoto");
    }

    #[test]
    fn test_wms_1_1_1_without_namespace() {
        let xml = r#"<WMT_MS_Capabilities version="1.1.1">
                <Capability><Layer><Name>base</Name></Layer></Capability>
            </WMT_MS_Capabilities>"#;
        let catalog = parse(xml, ServiceFamily::Wms);
        assert!(catalog.get("default", "base").is_some());
    }

    #[test]
    fn test_wms_document_under_wfs_family_finds_nothing() {
        let xml = format!(
            r#"<WMS_Capabilities xmlns="{}"><Capability><Layer><Name>x</Name></Layer></Capability></WMS_Capabilities>"#,
            WMS
        );
        let document = XmlDocument::parse(xml.as_bytes()).unwrap();
        assert!(!has_layer_elements(&document, ServiceFamily::Wfs));
        assert!(parse_capabilities(&document, ServiceFamily::Wfs).is_empty());
    }

    #[test]
    fn test_document_order_is_kept_within_namespace() {
        let xml = wfs_document(
            Some(WFS_2_0),
            &[("ns:Zeta", None), ("ns:Alpha", None), ("ns:Mid", None)],
        );
        let catalog = parse(&xml, ServiceFamily::Wfs);
        let order: Vec<_> = catalog
            .namespace("ns")
            .unwrap()
            .iter()
            .map(|l| l.local_name.as_str())
            .collect();
        assert_eq!(order, vec!["Zeta", "Alpha", "Mid"]);
    }

    fn layer_names() -> impl Strategy<Value = Vec<String>> {
        prop::collection::vec("([a-z]{1,6}:)?[A-Z][a-zA-Z0-9_]{0,8}", 1..8)
    }

    proptest! {
        #[test]
        fn prop_namespace_variants_yield_identical_names(names in layer_names()) {
            let entries: Vec<(&str, Option<&str>)> = names.iter().map(|n| (n.as_str(), None)).collect();

            let extract = |namespace: Option<&str>| -> Vec<String> {
                let xml = wfs_document(namespace, &entries);
                let catalog = parse(&xml, ServiceFamily::Wfs);
                let mut qualified: Vec<String> = catalog.layers().map(|l| l.name.clone()).collect();
                qualified.sort();
                qualified
            };

            let versioned = extract(Some(WFS_2_0));
            prop_assert_eq!(&versioned, &extract(Some(WFS_LEGACY)));
            prop_assert_eq!(&versioned, &extract(None));
        }

        #[test]
        fn prop_title_defaults_to_local_name(names in layer_names()) {
            let entries: Vec<(&str, Option<&str>)> = names.iter().map(|n| (n.as_str(), None)).collect();
            let catalog = parse(&wfs_document(Some(WFS_2_0), &entries), ServiceFamily::Wfs);
            for layer in catalog.layers() {
                prop_assert_eq!(&layer.title, &layer.local_name);
            }
        }
    }
}
