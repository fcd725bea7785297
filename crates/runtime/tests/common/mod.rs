//! 集成测试公共设施

#![allow(dead_code)]

use std::sync::Arc;

use datasage_core::{
    AgentConfig, ColumnInfo, ConnectionDescriptor, DatabaseSchema, EngineType, QueryResult,
    SchemaInfo, TableInfo,
};
use datasage_runtime::SqlAgent;

pub use datasage_runtime::testing::*;

// ============== 数据库 ==============

pub fn shop_schema() -> DatabaseSchema {
    let column = |name: &str, ty: &str| ColumnInfo {
        name: name.to_string(),
        data_type: ty.to_string(),
        key: None,
        nullable: true,
    };
    DatabaseSchema {
        schemas: vec![SchemaInfo {
            name: "shop".to_string(),
            tables: vec![TableInfo {
                name: "customers".to_string(),
                table_type: "BASE TABLE".to_string(),
                row_estimate: Some(120),
                columns: vec![column("id", "int"), column("name", "varchar(100)")],
            }],
        }],
    }
}

pub fn customers(n: usize) -> QueryResult {
    let rows = (1..=n)
        .map(|i| {
            let mut row = serde_json::Map::new();
            row.insert("id".to_string(), serde_json::json!(i));
            row.insert("name".to_string(), serde_json::json!(format!("Customer {i}")));
            row
        })
        .collect();
    QueryResult::new(vec!["id".to_string(), "name".to_string()], rows, 0.02)
}

pub fn shop() -> ConnectionDescriptor {
    ConnectionDescriptor {
        id: "conn-shop".to_string(),
        name: "shop".to_string(),
        engine: EngineType::MySql,
        host: "db.internal".to_string(),
        port: Some(3306),
        database: "shop".to_string(),
        username: "analyst".to_string(),
        password: "secret".to_string(),
        options: Default::default(),
    }
}

pub fn agent(
    provider: Arc<ScriptedProvider>,
    executor: Arc<ScriptedExecutor>,
    config: AgentConfig,
) -> SqlAgent {
    SqlAgent::new(provider, executor, Arc::new(StaticSchema(shop_schema())), config)
        .expect("valid agent config")
}

/// Deterministic xorshift for randomized scripts
pub struct XorShift(u64);

impl XorShift {
    pub fn new(seed: u64) -> Self {
        Self(seed.max(1))
    }

    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    pub fn below(&mut self, n: u64) -> u64 {
        self.next_u64() % n
    }
}
