//! The machine image data source.
//!
//! Declares how image records are identified, which attributes are
//! projected, and how their block device mappings and product codes are
//! canonicalized.

use crate::canonical::CanonicalPolicy;
use crate::fetch::InMemoryFetcher;
use crate::flatten::{
    CollectionField, ElementShape, OutputShape, ReasonField, RelatedLookup, ScalarField, SubmapField,
};
use crate::project::{ArnSpec, DataSource};
use crate::record::RecordKeys;

/// Identity attributes of an image record.
pub const IMAGE_KEYS: RecordKeys = RecordKeys {
    id: "image_id",
    name: "name",
    created: "creation_date",
    owner: "owner_id",
};

/// Attribute holding the owner alias (`amazon`, `aws-marketplace`, ...).
pub const OWNER_ALIAS: &str = "image_owner_alias";

/// Keys participating in block device mapping equality, alphabetical.
pub const BLOCK_DEVICE_MAPPING_POLICY: CanonicalPolicy = CanonicalPolicy::new(
    "block_device_mappings",
    &[
        "device_name",
        "ebs.delete_on_termination",
        "ebs.encrypted",
        "ebs.iops",
        "ebs.snapshot_id",
        "ebs.throughput",
        "ebs.volume_size",
        "ebs.volume_type",
        "no_device",
        "virtual_name",
    ],
);

/// Keys participating in product code equality, alphabetical.
pub const PRODUCT_CODE_POLICY: CanonicalPolicy =
    CanonicalPolicy::new("product_codes", &["product_code_id", "product_code_type"]);

const EBS_FIELDS: &[ScalarField] = &[
    ScalarField::bool("delete_on_termination"),
    ScalarField::bool("encrypted"),
    ScalarField::int("iops"),
    ScalarField::text("snapshot_id"),
    ScalarField::int("throughput"),
    ScalarField::int("volume_size"),
    ScalarField::text("volume_type"),
];

/// Block device mappings, projected as a canonical set.
pub const BLOCK_DEVICE_MAPPINGS: CollectionField = CollectionField {
    name: "block_device_mappings",
    source: "block_device_mappings",
    element: ElementShape {
        scalars: &[
            ScalarField::text("device_name"),
            ScalarField::text("no_device"),
            ScalarField::text("virtual_name"),
        ],
        submaps: &[SubmapField {
            name: "ebs",
            fields: EBS_FIELDS,
        }],
    },
    policy: BLOCK_DEVICE_MAPPING_POLICY,
};

/// Product codes, projected as a canonical set.
pub const PRODUCT_CODES: CollectionField = CollectionField {
    name: "product_codes",
    source: "product_codes",
    element: ElementShape {
        scalars: &[
            ScalarField::text("product_code_id"),
            ScalarField::text("product_code_type"),
        ],
        submaps: &[],
    },
    policy: PRODUCT_CODE_POLICY,
};

/// Snapshot backing the root device, if any.
pub const ROOT_SNAPSHOT_ID: RelatedLookup = RelatedLookup {
    name: "root_snapshot_id",
    key_field: "root_device_name",
    collection: "block_device_mappings",
    match_field: "device_name",
    value_path: "ebs.snapshot_id",
};

/// Why the image is in its current state.
pub const STATE_REASON: ReasonField = ReasonField {
    name: "state_reason",
    source: "state_reason",
    members: &["code", "message"],
};

/// Output shape of an image.
pub const IMAGE_SHAPE: OutputShape = OutputShape {
    scalars: &[
        ScalarField::text("architecture"),
        ScalarField::text("boot_mode"),
        ScalarField::text("creation_date"),
        ScalarField::text("deprecation_time"),
        ScalarField::text("description"),
        ScalarField::bool("ena_support"),
        ScalarField::text("hypervisor"),
        ScalarField::text("image_id"),
        ScalarField::text("image_location"),
        ScalarField::text(OWNER_ALIAS),
        ScalarField::text("image_type"),
        ScalarField::text("kernel_id"),
        ScalarField::text("name"),
        ScalarField::text("owner_id"),
        ScalarField::text("platform"),
        ScalarField::text("platform_details"),
        ScalarField::bool("public"),
        ScalarField::text("ramdisk_id"),
        ScalarField::text("root_device_name"),
        ScalarField::text("root_device_type"),
        ScalarField::text("sriov_net_support"),
        ScalarField::text("state"),
        ScalarField::text("usage_operation"),
        ScalarField::text("virtualization_type"),
    ],
    collections: &[BLOCK_DEVICE_MAPPINGS, PRODUCT_CODES],
    related: &[ROOT_SNAPSHOT_ID],
    reasons: &[STATE_REASON],
};

/// ARN of an image: `arn:<partition>:ec2:<region>::image/<id>`.
pub const IMAGE_ARN: ArnSpec = ArnSpec {
    service: "ec2",
    resource_type: "image",
};

/// The image data source.
pub const IMAGE_DATA_SOURCE: DataSource = DataSource {
    name: "image",
    keys: IMAGE_KEYS,
    shape: IMAGE_SHAPE,
    arn: Some(IMAGE_ARN),
    tags: Some("tags"),
};

/// Server-side filter names whose attribute path is not the plain
/// `-` → `_` rewrite.
pub const IMAGE_FILTER_ALIASES: &[(&str, &str)] = &[
    ("block-device-mapping.delete-on-termination", "block_device_mappings.ebs.delete_on_termination"),
    ("block-device-mapping.device-name", "block_device_mappings.device_name"),
    ("block-device-mapping.encrypted", "block_device_mappings.ebs.encrypted"),
    ("block-device-mapping.snapshot-id", "block_device_mappings.ebs.snapshot_id"),
    ("block-device-mapping.volume-size", "block_device_mappings.ebs.volume_size"),
    ("block-device-mapping.volume-type", "block_device_mappings.ebs.volume_type"),
    ("is-public", "public"),
    ("owner-alias", OWNER_ALIAS),
    ("product-code", "product_codes.product_code_id"),
    ("product-code.type", "product_codes.product_code_type"),
    ("state-reason-code", "state_reason.code"),
    ("state-reason-message", "state_reason.message"),
];

/// An in-memory fetcher that understands image owners and filter names.
#[must_use]
pub fn in_memory_fetcher() -> InMemoryFetcher {
    InMemoryFetcher::new()
        .with_owner_alias_field(OWNER_ALIAS)
        .with_filter_aliases(IMAGE_FILTER_ALIASES)
}
