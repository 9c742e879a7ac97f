//! Sample report routes

use bson::DateTime;
use hyper::Method;

use super::{ApiRequest, Reply};
use crate::services::reports::{self, ListReportsQuery};
use crate::services::ServiceContext;
use crate::types::Result;

pub async fn route(
    ctx: &ServiceContext,
    req: &ApiRequest,
    path: &[&str],
    now: DateTime,
) -> Option<Result<Reply>> {
    if req.method != Method::GET {
        return None;
    }
    let result = match path {
        ["reports"] => list_reports(ctx, req).await,
        ["reports", id] => report_detail(ctx, req, id, now).await,
        ["categories"] => categories(ctx).await,
        ["featured"] => featured(ctx, req).await,
        ["stats"] => stats(ctx).await,
        _ => return None,
    };
    Some(result)
}

async fn list_reports(ctx: &ServiceContext, req: &ApiRequest) -> Result<Reply> {
    let query = ListReportsQuery {
        category: req.query("category").map(str::to_string),
        featured_only: req.query_flag("featured_only")?,
        limit: req.query_i64("limit")?,
    };
    let list = reports::list_reports(ctx, query).await?;
    Reply::new(format!("Retrieved {} sample reports", list.total), list)
}

async fn report_detail(ctx: &ServiceContext, req: &ApiRequest, id: &str, now: DateTime) -> Result<Reply> {
    let detail = reports::report_detail(ctx, id, req.query("email"), now).await?;
    Reply::new("Sample report retrieved", detail)
}

async fn categories(ctx: &ServiceContext) -> Result<Reply> {
    Reply::new("Categories retrieved", reports::categories(ctx).await?)
}

async fn featured(ctx: &ServiceContext, req: &ApiRequest) -> Result<Reply> {
    let featured = reports::featured(ctx, req.query_i64("limit")?).await?;
    Reply::new("Featured reports retrieved", featured)
}

async fn stats(ctx: &ServiceContext) -> Result<Reply> {
    Reply::new("Sample statistics retrieved", reports::stats(ctx).await?)
}
