#[rocket::launch]
fn rocket() -> _ {
    wirechat::rocket()
}
