use std::env;

/// 读取布尔型环境变量：支持 true/false/1/0（大小写不敏感）
pub fn env_is_true(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(v) => {
            let v = v.trim();
            v.eq_ignore_ascii_case("true") || v == "1"
        }
        Err(_) => default,
    }
}

/// 读取字符串环境变量，若不存在则返回默认值
pub fn env_or_default(key: &str, default: &str) -> String {
    match env::var(key) {
        Ok(v) => v,
        Err(_) => default.to_string(),
    }
}

/// 读取 i64 环境变量，不存在或解析失败返回默认值
pub fn env_i64(key: &str, default: i64) -> i64 {
    match env::var(key) {
        Ok(v) => v.trim().parse::<i64>().ok().unwrap_or(default),
        Err(_) => default,
    }
}

/// 读取 u64 环境变量（秒数、容量等非负配置）
pub fn env_u64(key: &str, default: u64) -> u64 {
    match env::var(key) {
        Ok(v) => v.trim().parse::<u64>().ok().unwrap_or(default),
        Err(_) => default,
    }
}

/// 读取 f64 环境变量，非有限值视为解析失败
pub fn env_f64(key: &str, default: f64) -> f64 {
    match env::var(key) {
        Ok(v) => v
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|x| x.is_finite())
            .unwrap_or(default),
        Err(_) => default,
    }
}

/// 读取可选字符串：空字符串等同于未配置
pub fn env_opt(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_helpers_fallback_to_default() {
        assert!(env_is_true("POSITION_GUARD_TEST_MISSING_BOOL", true));
        assert_eq!(env_i64("POSITION_GUARD_TEST_MISSING_I64", 7), 7);
        assert_eq!(env_or_default("POSITION_GUARD_TEST_MISSING_STR", "x"), "x");
        assert_eq!(env_opt("POSITION_GUARD_TEST_MISSING_OPT"), None);
    }

    #[test]
    fn test_env_f64_rejects_garbage() {
        env::set_var("POSITION_GUARD_TEST_F64", "abc");
        assert_eq!(env_f64("POSITION_GUARD_TEST_F64", 2.5), 2.5);
        env::set_var("POSITION_GUARD_TEST_F64", " 1.25 ");
        assert_eq!(env_f64("POSITION_GUARD_TEST_F64", 2.5), 1.25);
        env::remove_var("POSITION_GUARD_TEST_F64");
    }

    #[test]
    fn test_env_is_true_accepts_one() {
        env::set_var("POSITION_GUARD_TEST_BOOL", "1");
        assert!(env_is_true("POSITION_GUARD_TEST_BOOL", false));
        env::set_var("POSITION_GUARD_TEST_BOOL", "TRUE");
        assert!(env_is_true("POSITION_GUARD_TEST_BOOL", false));
        env::set_var("POSITION_GUARD_TEST_BOOL", "no");
        assert!(!env_is_true("POSITION_GUARD_TEST_BOOL", true));
        env::remove_var("POSITION_GUARD_TEST_BOOL");
    }
}
