use rocket::Route;

mod audit;
mod public;
mod terminal;

pub fn routes() -> Vec<Route> {
    let mut routes = Vec::new();
    routes.extend(terminal::routes());
    routes.extend(public::routes());
    routes.extend(audit::routes());
    routes
}
