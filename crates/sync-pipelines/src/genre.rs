//! Genre query, mapping, and transformer — the simplest of the three:
//! one source row maps directly to one document, addressed by `name`
//! rather than `id` (a deliberate, documented asymmetry, §4.3).

use serde_json::{json, Map, Value};
use sync_core::{Document, PipelineConfig, Row, Transformer};

pub const QUERY: &str = "\
SELECT id, name, modified
FROM content.genre
WHERE modified > $1
ORDER BY modified ASC
LIMIT $2";

pub fn index_mapping() -> Value {
    json!({
        "settings": { "refresh_interval": "1s" },
        "mappings": {
            "dynamic": "strict",
            "properties": {
                "id": { "type": "keyword" },
                "name": { "type": "text" }
            }
        }
    })
}

pub fn pipeline_config(index_name: String, default_sync_time: String, sleep_secs: u64, batch_size: u32) -> PipelineConfig {
    PipelineConfig {
        name: "genres".to_string(),
        watermark_key: "last_synced_time_genres".to_string(),
        index_name,
        index_mapping: index_mapping(),
        default_sync_time,
        default_sleep_time: std::time::Duration::from_secs(sleep_secs),
        batch_size,
    }
}

pub struct GenreTransformer {
    index_name: String,
}

impl GenreTransformer {
    pub fn new(index_name: impl Into<String>) -> Self {
        Self {
            index_name: index_name.into(),
        }
    }
}

impl Transformer for GenreTransformer {
    fn transform(&self, rows: Vec<Row>) -> Box<dyn Iterator<Item = Document> + Send> {
        let index_name = self.index_name.clone();
        let iter = rows.into_iter().map(move |row| {
            let name = row.get_str("name").unwrap_or_default().to_string();

            let mut source = Map::new();
            source.insert("id".to_string(), row.get("id").cloned().unwrap_or(Value::Null));
            source.insert("name".to_string(), row.get("name").cloned().unwrap_or(Value::Null));

            Document::new(index_name.clone(), name, Value::Object(source))
        });
        Box::new(iter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn document_id_is_the_genre_name_not_the_uuid() {
        let Value::Object(map) = json!({"id": "g-uuid-1", "name": "Drama"}) else {
            unreachable!()
        };
        let row = Row::new(map);

        let transformer = GenreTransformer::new("genres");
        let docs: Vec<Document> = transformer.transform(vec![row]).collect();
        assert_eq!(docs[0].id, "Drama");
        assert_eq!(docs[0].source["id"], json!("g-uuid-1"));
    }
}
