use serde::{Deserialize, Serialize};

use crate::error::app_error::AppError;

pub mod market;
pub mod model;
pub mod okx_client;
pub mod trade;

// 通用的响应结构体
#[derive(Serialize, Deserialize, Debug)]
pub struct OkxApiResponse<T> {
    pub code: String,
    pub msg: String,
    pub data: T,
}

impl<T> OkxApiResponse<T> {
    /// code 非 "0" 时转为业务错误
    pub fn into_data(self) -> Result<T, AppError> {
        if self.code == "0" {
            Ok(self.data)
        } else {
            Err(AppError::OkxApiError {
                code: self.code,
                msg: self.msg,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_data_maps_error_code() {
        let res: OkxApiResponse<Vec<i32>> =
            serde_json::from_str(r#"{"code":"51001","msg":"Instrument ID does not exist","data":[]}"#)
                .unwrap();
        assert!(matches!(res.into_data(), Err(AppError::OkxApiError { code, .. }) if code == "51001"));

        let res: OkxApiResponse<Vec<i32>> =
            serde_json::from_str(r#"{"code":"0","msg":"","data":[1]}"#).unwrap();
        assert_eq!(res.into_data().unwrap(), vec![1]);
    }
}
