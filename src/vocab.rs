//! Vocabulary - well-known predicate and class IRIs
//!
//! The engine is metadata driven, but a handful of keys carry fixed meaning
//! (identifiers, lifecycle stamps, version links).

pub const RDF_TYPE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#type";

pub const XSD_STRING: &str = "http://www.w3.org/2001/XMLSchema#string";
pub const XSD_DATE_TIME: &str = "http://www.w3.org/2001/XMLSchema#dateTime";
pub const XSD_DATE: &str = "http://www.w3.org/2001/XMLSchema#date";
pub const XSD_BOOLEAN: &str = "http://www.w3.org/2001/XMLSchema#boolean";
pub const XSD_INTEGER: &str = "http://www.w3.org/2001/XMLSchema#integer";
pub const XSD_DECIMAL: &str = "http://www.w3.org/2001/XMLSchema#decimal";
pub const XSD_ANY_URI: &str = "http://www.w3.org/2001/XMLSchema#anyURI";

macro_rules! kos {
    ($name:ident, $local:literal) => {
        pub const $name: &str = concat!("https://pid.catalog.dev/kos/", $local);
    };
}

kos!(HAS_PID, "hasPID");
kos!(HAS_BASE_URI, "hasBaseURI");
kos!(HAS_URI_TEMPLATE, "hasUriTemplate");
kos!(PERMANENT_IDENTIFIER, "PermanentIdentifier");
kos!(DISTRIBUTION, "distribution");
kos!(HAS_NETWORK_ADDRESS, "hasNetworkAddress");
kos!(AUTHOR, "author");
kos!(DATE_CREATED, "dateCreated");
kos!(DATE_MODIFIED, "lastChangeDateTime");
kos!(LAST_CHANGE_USER, "lastChangeUser");
kos!(CHANGE_REQUESTER, "changeRequester");
kos!(LIFECYCLE_STATUS, "hasEntryLifecycleStatus");
kos!(HAS_LATER_VERSION, "hasLaterVersion");
kos!(HAS_PREVIOUS_VERSION, "hasPreviousVersion");
kos!(HAS_HISTORIC_VERSION, "hasHistoricVersion");
kos!(METADATA_GRAPH_CONFIGURATION, "metadataGraphConfiguration");

/// Metadata group holding links between resources.
pub const GROUP_LINK_TYPES: &str = "LinkTypes";

/// Field type of properties holding a person (e-mail address).
pub const FIELD_TYPE_PERSON: &str = "person";
