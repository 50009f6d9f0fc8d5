//! Metadata database access
//!
//! Read-only SQLite access to the per-image metadata table named by the
//! properties file. Table and column names come from configuration, so
//! the SQL here is assembled from those identifiers and rows are read
//! positionally: key columns first, then whatever the query adds.

use ksprof_common::config::Properties;
use ksprof_common::{Error, GroupKey, ImageKey, PlateId, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

/// Connection to the metadata database plus the configuration that names
/// its tables and columns.
pub struct MetadataDb {
    pool: SqlitePool,
    props: Properties,
}

impl MetadataDb {
    /// Connect in read-only mode. The profiler never writes metadata.
    pub async fn connect(props: &Properties) -> Result<Self> {
        if !props.db_path.exists() {
            return Err(Error::Config(format!(
                "metadata database not found: {}",
                props.db_path.display()
            )));
        }
        let db_url = format!("sqlite://{}?mode=ro", props.db_path.display());
        debug!("Connecting to metadata database: {db_url}");
        let pool = SqlitePool::connect(&db_url).await?;
        Ok(Self {
            pool,
            props: props.clone(),
        })
    }

    /// Wrap an existing pool (test fixtures use in-memory databases).
    pub fn from_pool(pool: SqlitePool, props: &Properties) -> Self {
        Self {
            pool,
            props: props.clone(),
        }
    }

    /// Evaluate a named group query: group key -> ordered treatment
    /// images. An optional named filter restricts the images considered.
    pub async fn group_map(
        &self,
        group_name: &str,
        filter: Option<&str>,
    ) -> Result<BTreeMap<GroupKey, Vec<ImageKey>>> {
        let group_def = self.props.group(group_name)?;
        let allowed = match filter {
            Some(name) => Some(self.filter_image_keys(name).await?),
            None => None,
        };

        let key_width = self.props.image_key_columns.len();
        let rows = sqlx::query(&group_def.query).fetch_all(&self.pool).await?;

        let mut map: BTreeMap<GroupKey, Vec<ImageKey>> = BTreeMap::new();
        for row in rows {
            if row.len() <= key_width {
                return Err(Error::Config(format!(
                    "group '{group_name}' query must select the {key_width} image key \
                     column(s) followed by at least one label column"
                )));
            }
            let image = image_key(&row, key_width)?;
            if let Some(allowed) = &allowed {
                if !allowed.contains(&image) {
                    continue;
                }
            }
            let labels = (key_width..row.len())
                .map(|i| label_value(&row, i))
                .collect::<Result<Vec<String>>>()?;
            map.entry(GroupKey::new(labels)).or_default().push(image);
        }

        if map.is_empty() {
            return Err(Error::Config(match filter {
                Some(name) => format!(
                    "group '{group_name}' matched no images under filter '{name}'"
                ),
                None => format!("group '{group_name}' matched no images"),
            }));
        }
        debug!("group '{group_name}' resolved {} groups", map.len());
        Ok(map)
    }

    /// The total image -> plate mapping for the whole run.
    pub async fn plate_by_image(&self) -> Result<HashMap<ImageKey, PlateId>> {
        let sql = format!(
            "SELECT {}, {} FROM {}",
            self.image_key_clause(),
            self.props.plate_column,
            self.props.image_table
        );
        let key_width = self.props.image_key_columns.len();
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;

        let mut map = HashMap::with_capacity(rows.len());
        for row in rows {
            let image = image_key(&row, key_width)?;
            let plate = PlateId::from(label_value(&row, key_width)?);
            map.insert(image, plate);
        }
        Ok(map)
    }

    /// Per plate, the images selected by the named control filter.
    pub async fn control_images_by_plate(
        &self,
        filter_name: &str,
    ) -> Result<HashMap<PlateId, Vec<ImageKey>>> {
        let filter = self.props.filter(filter_name)?;
        let sql = format!(
            "SELECT {}, {} FROM {} WHERE {}",
            self.image_key_clause(),
            self.props.plate_column,
            self.props.image_table,
            filter.predicate
        );
        let key_width = self.props.image_key_columns.len();
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;

        let mut map: HashMap<PlateId, Vec<ImageKey>> = HashMap::new();
        for row in rows {
            let image = image_key(&row, key_width)?;
            let plate = PlateId::from(label_value(&row, key_width)?);
            map.entry(plate).or_default().push(image);
        }
        debug!(
            "control filter '{filter_name}' selected images on {} plates",
            map.len()
        );
        Ok(map)
    }

    async fn filter_image_keys(&self, filter_name: &str) -> Result<HashSet<ImageKey>> {
        let filter = self.props.filter(filter_name)?;
        let sql = format!(
            "SELECT {} FROM {} WHERE {}",
            self.image_key_clause(),
            self.props.image_table,
            filter.predicate
        );
        let key_width = self.props.image_key_columns.len();
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(|row| image_key(row, key_width)).collect()
    }

    fn image_key_clause(&self) -> String {
        self.props.image_key_columns.join(", ")
    }
}

fn image_key(row: &SqliteRow, key_width: usize) -> Result<ImageKey> {
    let mut parts = Vec::with_capacity(key_width);
    for i in 0..key_width {
        parts.push(row.try_get::<i64, _>(i)?);
    }
    Ok(ImageKey::new(parts))
}

/// Read a label or plate cell as text, whatever SQLite stored it as.
fn label_value(row: &SqliteRow, index: usize) -> Result<String> {
    if let Ok(v) = row.try_get::<String, _>(index) {
        return Ok(v);
    }
    if let Ok(v) = row.try_get::<i64, _>(index) {
        return Ok(v.to_string());
    }
    if let Ok(v) = row.try_get::<f64, _>(index) {
        return Ok(v.to_string());
    }
    Err(Error::Config(format!(
        "column {index} holds a type usable as neither label nor plate"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ksprof_common::config::{FilterDef, GroupDef};
    use std::path::PathBuf;

    fn props() -> Properties {
        Properties {
            db_path: PathBuf::from(":memory:"),
            image_table: "per_image".into(),
            image_key_columns: vec!["TableNumber".into(), "ImageNumber".into()],
            plate_column: "Plate".into(),
            filters: BTreeMap::from([
                (
                    "negcon".to_string(),
                    FilterDef {
                        predicate: "Well IN ('A02', 'B11')".into(),
                    },
                ),
                (
                    "edge_free".to_string(),
                    FilterDef {
                        predicate: "Well <> 'A01'".into(),
                    },
                ),
            ]),
            groups: BTreeMap::from([(
                "compound".to_string(),
                GroupDef {
                    query: "SELECT TableNumber, ImageNumber, Compound FROM per_image \
                            WHERE Compound <> 'DMSO'"
                        .into(),
                },
            )]),
        }
    }

    async fn fixture() -> MetadataDb {
        // One connection only: every pooled connection to :memory: would
        // otherwise open its own empty database.
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::query(
            "CREATE TABLE per_image (
                TableNumber INTEGER,
                ImageNumber INTEGER,
                Plate TEXT,
                Well TEXT,
                Compound TEXT
            )",
        )
        .execute(&pool)
        .await
        .unwrap();

        let rows = [
            (0, 1, "P1", "A01", "taxol"),
            (0, 2, "P1", "A02", "DMSO"),
            (0, 3, "P1", "B11", "DMSO"),
            (0, 4, "P2", "A01", "taxol"),
            (0, 5, "P2", "A02", "DMSO"),
            (0, 6, "P2", "C05", "anisomycin"),
        ];
        for (t, i, plate, well, compound) in rows {
            sqlx::query(
                "INSERT INTO per_image (TableNumber, ImageNumber, Plate, Well, Compound) \
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(t)
            .bind(i)
            .bind(plate)
            .bind(well)
            .bind(compound)
            .execute(&pool)
            .await
            .unwrap();
        }
        MetadataDb::from_pool(pool, &props())
    }

    fn image(t: i64, i: i64) -> ImageKey {
        ImageKey::new(vec![t, i])
    }

    #[tokio::test]
    async fn group_map_partitions_by_label() {
        let db = fixture().await;
        let groups = db.group_map("compound", None).await.unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(
            groups[&GroupKey::new(vec!["taxol".into()])],
            vec![image(0, 1), image(0, 4)]
        );
        assert_eq!(
            groups[&GroupKey::new(vec!["anisomycin".into()])],
            vec![image(0, 6)]
        );
    }

    #[tokio::test]
    async fn group_map_honors_the_image_filter() {
        let db = fixture().await;
        let groups = db.group_map("compound", Some("edge_free")).await.unwrap();
        // Both taxol images sit in well A01 and are filtered out.
        assert_eq!(groups.len(), 1);
        assert!(groups.contains_key(&GroupKey::new(vec!["anisomycin".into()])));
    }

    #[tokio::test]
    async fn unknown_group_is_a_config_error() {
        let db = fixture().await;
        let err = db.group_map("dose", None).await.unwrap_err();
        assert!(err.to_string().contains("dose"));
    }

    #[tokio::test]
    async fn plate_by_image_is_total() {
        let db = fixture().await;
        let plates = db.plate_by_image().await.unwrap();
        assert_eq!(plates.len(), 6);
        assert_eq!(plates[&image(0, 1)], PlateId::from("P1"));
        assert_eq!(plates[&image(0, 6)], PlateId::from("P2"));
    }

    #[tokio::test]
    async fn control_images_group_by_plate() {
        let db = fixture().await;
        let controls = db.control_images_by_plate("negcon").await.unwrap();
        assert_eq!(controls.len(), 2);
        assert_eq!(
            controls[&PlateId::from("P1")],
            vec![image(0, 2), image(0, 3)]
        );
        assert_eq!(controls[&PlateId::from("P2")], vec![image(0, 5)]);
    }
}
