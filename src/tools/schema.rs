//! 工具参数 JSON Schema 生成（schemars 从参数结构体自动派生）
//!
//! 生成结果直接作为 ToolDescriptor 的 parameters 发给 Completion Service，去掉 `$schema` / `title` 等元信息。

use schemars::{schema_for, JsonSchema};
use serde_json::Value;

/// 由参数结构体派生 object schema
pub fn parameters_schema<T: JsonSchema>() -> Value {
    let schema = schema_for!(T);
    let mut value = serde_json::to_value(&schema).unwrap_or_else(|_| {
        serde_json::json!({ "type": "object", "properties": {} })
    });
    if let Some(obj) = value.as_object_mut() {
        obj.remove("$schema");
        obj.remove("title");
        if obj
            .get("definitions")
            .and_then(Value::as_object)
            .map(|d| d.is_empty())
            .unwrap_or(false)
        {
            obj.remove("definitions");
        }
    }
    value
}

/// 把某个字符串属性约束为封闭取值集合
pub fn restrict_to_enum(schema: &mut Value, property: &str, values: &[String]) {
    if let Some(prop) = schema
        .get_mut("properties")
        .and_then(|p| p.get_mut(property))
        .and_then(Value::as_object_mut)
    {
        prop.insert("enum".to_string(), Value::from(values.to_vec()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[allow(dead_code)]
    #[derive(Deserialize, JsonSchema)]
    struct Args {
        /// 城市
        location: String,
        nights: Option<u32>,
    }

    #[test]
    fn test_schema_is_plain_object() {
        let schema = parameters_schema::<Args>();
        assert_eq!(schema["type"], "object");
        assert!(schema.get("$schema").is_none());
        assert!(schema.get("title").is_none());
        assert_eq!(schema["required"], serde_json::json!(["location"]));
        assert_eq!(schema["properties"]["location"]["description"], "城市");
    }

    #[test]
    fn test_restrict_to_enum() {
        let mut schema = parameters_schema::<Args>();
        restrict_to_enum(&mut schema, "location", &["Paris".to_string(), "Lyon".to_string()]);
        assert_eq!(schema["properties"]["location"]["enum"], serde_json::json!(["Paris", "Lyon"]));
    }
}
