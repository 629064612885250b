use rocket::serde::Serialize;
use rocket::serde::json::Json;
use rocket::{Request, catch};

#[derive(Serialize)]
#[serde(crate = "rocket::serde")]
pub struct Error {
    pub code: &'static str,
    pub message: String,
}

#[catch(401)]
pub fn unauthorized(_: &Request) -> Json<Error> {
    Json(Error {
        code: "UNAUTHORIZED",
        message: "Unauthorized".to_string(),
    })
}

#[catch(403)]
pub fn forbidden(_: &Request) -> Json<Error> {
    Json(Error {
        code: "FORBIDDEN",
        message: "Forbidden".to_string(),
    })
}

#[catch(404)]
pub fn not_found(_: &Request) -> Json<Error> {
    Json(Error {
        code: "NOT_FOUND",
        message: "Not found".to_string(),
    })
}

#[catch(409)]
pub fn conflict(_: &Request) -> Json<Error> {
    Json(Error {
        code: "CONFLICT",
        message: "Conflict".to_string(),
    })
}

#[catch(422)]
pub fn unprocessable(_: &Request) -> Json<Error> {
    Json(Error {
        code: "UNPROCESSABLE",
        message: "Request body could not be parsed".to_string(),
    })
}
