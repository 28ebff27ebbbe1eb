#[macro_use]
extern crate rocket;

mod auth;
mod charts;
mod config;
mod db;
mod error;
mod flatfile;
mod insights;
mod models;
mod store;

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, Timelike};
use config::AppConfig;
use db::DbPool;
use error::Result;
use models::{Expense, ExpenseFilter, NewExpense, TIMESTAMP_FORMAT, User};
use rocket::fairing::AdHoc;
use rocket::figment::Figment;
use rocket::form::Form;
use rocket::fs::FileServer;
use rocket::http::{CookieJar, Header, Status};
use rocket::request::FlashMessage;
use rocket::response::{Flash, Redirect};
use rocket::serde::Serialize;
use rocket::{Build, Rocket, State};
use rocket_dyn_templates::Template;
use store::SharedStore;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(FromForm)]
struct RegisterForm {
    username: String,
    email: String,
    password: String,
    confirm_password: String,
}

#[derive(FromForm)]
struct LoginForm {
    email: String,
    password: String,
}

#[derive(FromForm)]
struct ChangePasswordForm {
    current_password: String,
    new_password: String,
    confirm_password: String,
}

#[derive(FromForm)]
struct ExpenseForm {
    category: String,
    amount: String,
    date: Option<String>,
    note: Option<String>,
}

#[derive(FromForm)]
struct CategoryForm {
    name: String,
    icon: String,
}

#[derive(FromForm)]
struct DeleteCategoryForm {
    name: String,
}

#[derive(Serialize)]
struct ExpenseView {
    id: i64,
    category: String,
    amount: String,
    spent_at: String,
    note: Option<String>,
}

#[derive(Serialize)]
struct CategoryTotalView {
    category: String,
    amount: String,
    percent: String,
}

#[derive(Responder)]
#[response(content_type = "text/csv")]
struct CsvDownload {
    body: Vec<u8>,
    disposition: Header<'static>,
}

fn format_amount(amount: f64) -> String {
    format!("{amount:.2}")
}

/// Accepts `12`, `12.5` and `12,50`; rejects negatives and non-numbers.
fn parse_amount(input: &str) -> Option<f64> {
    let amount: f64 = input.trim().replace(',', ".").parse().ok()?;
    (amount.is_finite() && amount >= 0.0).then_some(amount)
}

fn parse_day(input: Option<&str>) -> Option<NaiveDate> {
    let input = input.map(str::trim).filter(|value| !value.is_empty())?;
    NaiveDate::parse_from_str(input, "%Y-%m-%d").ok()
}

fn non_empty(input: Option<String>) -> Option<String> {
    input
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn now() -> NaiveDateTime {
    let now = Local::now().naive_local();
    now.with_nanosecond(0).unwrap_or(now)
}

fn flash_context(flash: Option<FlashMessage<'_>>) -> serde_json::Value {
    match flash {
        Some(flash) => serde_json::json!({
            "kind": flash.kind(),
            "message": flash.message(),
        }),
        None => serde_json::Value::Null,
    }
}

fn expense_view(expense: Expense) -> ExpenseView {
    ExpenseView {
        id: expense.id,
        category: expense.category,
        amount: format_amount(expense.amount),
        spent_at: expense.spent_at.format(TIMESTAMP_FORMAT).to_string(),
        note: expense.note,
    }
}

#[get("/register")]
fn register(
    pool: &State<DbPool>,
    cookies: &CookieJar<'_>,
    flash: Option<FlashMessage<'_>>,
) -> std::result::Result<Template, Redirect> {
    if auth::current_user(pool, cookies).is_some() {
        return Err(Redirect::to("/"));
    }
    Ok(Template::render(
        "register",
        serde_json::json!({ "flash": flash_context(flash) }),
    ))
}

#[post("/register", data = "<form>")]
fn register_post(
    pool: &State<DbPool>,
    config: &State<AppConfig>,
    cookies: &CookieJar<'_>,
    form: Form<RegisterForm>,
) -> Result<Flash<Redirect>> {
    let form = form.into_inner();
    let username = form.username.trim();
    let email = form.email.trim().to_lowercase();
    let back = |message: String| Flash::error(Redirect::to("/register"), message);

    if username.is_empty() || email.is_empty() || form.password.is_empty() {
        return Ok(back("All fields are required!".to_string()));
    }
    if username.chars().count() < 3 {
        return Ok(back("Username must be at least 3 characters!".to_string()));
    }
    if form.password.chars().count() < config.min_password_len {
        return Ok(back(format!(
            "Password must be at least {} characters!",
            config.min_password_len
        )));
    }
    if form.password != form.confirm_password {
        return Ok(back("Passwords do not match!".to_string()));
    }

    let mut conn = pool.get()?;
    if db::email_taken(&conn, &email)? {
        return Ok(back("Email already registered! Please login.".to_string()));
    }
    if db::username_taken(&conn, username)? {
        return Ok(back("Username already taken!".to_string()));
    }

    let password_hash = auth::hash_password(&form.password)?;
    let created_at = Local::now().to_rfc3339();
    let user_id = db::create_user(&mut conn, username, &email, &password_hash, &created_at)?;
    info!("registered user {user_id} ({username})");

    auth::start_session(&conn, cookies, user_id, config.max_sessions)?;
    Ok(Flash::success(
        Redirect::to("/"),
        format!("Account created successfully! Welcome {username}!"),
    ))
}

#[get("/login")]
fn login(
    pool: &State<DbPool>,
    cookies: &CookieJar<'_>,
    flash: Option<FlashMessage<'_>>,
) -> std::result::Result<Template, Redirect> {
    if auth::current_user(pool, cookies).is_some() {
        return Err(Redirect::to("/"));
    }
    Ok(Template::render(
        "login",
        serde_json::json!({ "flash": flash_context(flash) }),
    ))
}

#[post("/login", data = "<form>")]
fn login_post(
    pool: &State<DbPool>,
    config: &State<AppConfig>,
    cookies: &CookieJar<'_>,
    form: Form<LoginForm>,
) -> Result<Flash<Redirect>> {
    let form = form.into_inner();
    let email = form.email.trim().to_lowercase();
    let back = |message: &str| Flash::error(Redirect::to("/login"), message);
    if email.is_empty() || form.password.is_empty() {
        return Ok(back("Please enter both email and password!"));
    }

    let conn = pool.get()?;
    let Some((user_id, username, hash)) = db::user_credentials(&conn, &email)? else {
        return Ok(back("Invalid email or password!"));
    };
    if !auth::verify_password(&hash, &form.password) {
        return Ok(back("Invalid email or password!"));
    }

    auth::start_session(&conn, cookies, user_id, config.max_sessions)?;
    info!("user {user_id} logged in");
    Ok(Flash::success(
        Redirect::to("/"),
        format!("Welcome back, {username}!"),
    ))
}

#[get("/logout")]
fn logout(pool: &State<DbPool>, cookies: &CookieJar<'_>) -> Flash<Redirect> {
    let username = auth::current_user(pool, cookies).map(|user| user.username);
    auth::end_session(pool, cookies);
    let message = match username {
        Some(username) => format!("Goodbye, {username}! You have been logged out."),
        None => "You have been logged out.".to_string(),
    };
    Flash::new(Redirect::to("/login"), "info", message)
}

#[get("/profile")]
fn profile(
    pool: &State<DbPool>,
    store: &State<SharedStore>,
    config: &State<AppConfig>,
    cookies: &CookieJar<'_>,
    flash: Option<FlashMessage<'_>>,
) -> Result<Template> {
    let user = auth::require_user(pool, cookies)?;
    let conn = pool.get()?;
    let account = db::profile(&conn, user.id)?.ok_or(error::Error::Unauthorized)?;
    let expenses = store.list(user.id, &ExpenseFilter::default())?;
    let total: f64 = expenses.iter().map(|expense| expense.amount).sum();
    let member_since = DateTime::parse_from_rfc3339(&account.created_at)
        .map(|created| created.format("%B %d, %Y").to_string())
        .unwrap_or_else(|_| account.created_at.clone());

    let context = serde_json::json!({
        "username": user.username,
        "currency": config.currency,
        "flash": flash_context(flash),
        "profile": account,
        "member_since": member_since,
        "total_expenses": expenses.len(),
        "total_amount": format_amount(total),
        "total_categories": db::category_count(&conn, user.id)?,
        "active_sessions": db::session_count(&conn, user.id)?,
    });
    Ok(Template::render("profile", &context))
}

#[post("/profile/password", data = "<form>")]
fn profile_password(
    pool: &State<DbPool>,
    config: &State<AppConfig>,
    cookies: &CookieJar<'_>,
    form: Form<ChangePasswordForm>,
) -> Result<Flash<Redirect>> {
    let user = auth::require_user(pool, cookies)?;
    let form = form.into_inner();
    let back = |message: String| Flash::error(Redirect::to("/profile"), message);

    if form.new_password.chars().count() < config.min_password_len {
        return Ok(back(format!(
            "New password must be at least {} characters!",
            config.min_password_len
        )));
    }
    if form.new_password != form.confirm_password {
        return Ok(back("Passwords do not match!".to_string()));
    }

    let conn = pool.get()?;
    let Some(hash) = db::password_hash(&conn, user.id)? else {
        return Err(error::Error::Unauthorized);
    };
    if !auth::verify_password(&hash, &form.current_password) {
        return Ok(back("Current password is incorrect!".to_string()));
    }

    let new_hash = auth::hash_password(&form.new_password)?;
    db::update_password(&conn, user.id, &new_hash)?;
    Ok(Flash::success(Redirect::to("/profile"), "Password updated."))
}

#[post("/profile/logout_all")]
fn profile_logout_all(pool: &State<DbPool>, cookies: &CookieJar<'_>) -> Result<Flash<Redirect>> {
    let user = auth::require_user(pool, cookies)?;
    db::delete_sessions_for_user(&*pool.get()?, user.id)?;
    auth::end_session(pool, cookies);
    info!("user {} logged out everywhere", user.id);
    Ok(Flash::new(
        Redirect::to("/login"),
        "info",
        "You have been logged out on every device.",
    ))
}

#[get("/")]
fn home(
    pool: &State<DbPool>,
    config: &State<AppConfig>,
    cookies: &CookieJar<'_>,
    flash: Option<FlashMessage<'_>>,
) -> Result<Template> {
    let user: User = auth::require_user(pool, cookies)?;
    let conn = pool.get()?;
    let list = db::list_categories(&conn, user.id)?;
    let context = serde_json::json!({
        "username": user.username,
        "currency": config.currency,
        "flash": flash_context(flash),
        "today": Local::now().date_naive().format("%Y-%m-%d").to_string(),
        "categories": list,
    });
    Ok(Template::render("add_expense", &context))
}

#[post("/expenses", data = "<form>")]
fn add_expense(
    pool: &State<DbPool>,
    store: &State<SharedStore>,
    cookies: &CookieJar<'_>,
    form: Form<ExpenseForm>,
) -> Result<Flash<Redirect>> {
    let user = auth::require_user(pool, cookies)?;
    let form = form.into_inner();
    let back = |message: &str| Flash::error(Redirect::to("/"), message);

    let category = form.category.trim();
    if category.is_empty() {
        return Ok(back("Please choose a category!"));
    }
    let Some(amount) = parse_amount(&form.amount) else {
        return Ok(back("Amount must be a non-negative number!"));
    };
    let spent_at = match non_empty(form.date) {
        None => now(),
        Some(date) => match parse_day(Some(&date)) {
            Some(day) => day.and_time(now().time()),
            None => return Ok(back("Date must look like YYYY-MM-DD!")),
        },
    };

    let expense = NewExpense {
        category: category.to_string(),
        amount,
        spent_at,
        note: non_empty(form.note),
    };
    store.append(user.id, &expense)?;
    Ok(Flash::success(
        Redirect::to("/"),
        format!(
            "Expense of {} added to {category} successfully!",
            format_amount(amount)
        ),
    ))
}

#[get("/expenses?<category>&<start_date>&<end_date>")]
fn view_expenses(
    pool: &State<DbPool>,
    store: &State<SharedStore>,
    config: &State<AppConfig>,
    cookies: &CookieJar<'_>,
    flash: Option<FlashMessage<'_>>,
    category: Option<String>,
    start_date: Option<String>,
    end_date: Option<String>,
) -> Result<Template> {
    let user = auth::require_user(pool, cookies)?;
    let filter = ExpenseFilter {
        category: non_empty(category.clone()),
        start: parse_day(start_date.as_deref()),
        end: parse_day(end_date.as_deref()),
    };
    let expenses = store.list(user.id, &filter)?;
    let total: f64 = expenses.iter().map(|expense| expense.amount).sum();
    let views = expenses.into_iter().map(expense_view).collect::<Vec<_>>();

    let context = serde_json::json!({
        "username": user.username,
        "currency": config.currency,
        "flash": flash_context(flash),
        "expenses": views,
        "total": format_amount(total),
        "category": category.unwrap_or_default(),
        "start_date": start_date.unwrap_or_default(),
        "end_date": end_date.unwrap_or_default(),
    });
    Ok(Template::render("view_expenses", &context))
}

#[post("/expenses/<id>/delete")]
fn delete_expense(
    pool: &State<DbPool>,
    store: &State<SharedStore>,
    cookies: &CookieJar<'_>,
    id: i64,
) -> Result<Flash<Redirect>> {
    let user = auth::require_user(pool, cookies)?;
    let redirect = Redirect::to("/expenses");
    if store.delete(user.id, id)? {
        Ok(Flash::success(redirect, "Expense deleted successfully!"))
    } else {
        Ok(Flash::error(redirect, "Expense not found!"))
    }
}

#[post("/expenses/clear")]
fn clear_expenses(
    pool: &State<DbPool>,
    store: &State<SharedStore>,
    cookies: &CookieJar<'_>,
) -> Result<Flash<Redirect>> {
    let user = auth::require_user(pool, cookies)?;
    let removed = store.clear(user.id)?;
    info!("user {} cleared {removed} expenses", user.id);
    Ok(Flash::new(
        Redirect::to("/expenses"),
        "info",
        format!("All {removed} expenses deleted!"),
    ))
}

#[get("/categories")]
fn categories(
    pool: &State<DbPool>,
    cookies: &CookieJar<'_>,
    flash: Option<FlashMessage<'_>>,
) -> Result<Template> {
    let user = auth::require_user(pool, cookies)?;
    let conn = pool.get()?;
    let list = db::list_categories(&conn, user.id)?;
    let context = serde_json::json!({
        "username": user.username,
        "flash": flash_context(flash),
        "categories": list,
    });
    Ok(Template::render("categories", &context))
}

#[post("/categories", data = "<form>")]
fn add_category(
    pool: &State<DbPool>,
    cookies: &CookieJar<'_>,
    form: Form<CategoryForm>,
) -> Result<Flash<Redirect>> {
    let user = auth::require_user(pool, cookies)?;
    let form = form.into_inner();
    let redirect = Redirect::to("/categories");
    let (name, icon) = (form.name.trim(), form.icon.trim());
    if name.is_empty() || icon.is_empty() {
        return Ok(Flash::error(redirect, "Provide both name and icon!"));
    }
    let conn = pool.get()?;
    if db::insert_category(&conn, user.id, name, icon)? {
        Ok(Flash::success(redirect, format!("Category {name} added!")))
    } else {
        Ok(Flash::error(
            redirect,
            format!("Category {name} already exists!"),
        ))
    }
}

#[post("/categories/delete", data = "<form>")]
fn delete_category(
    pool: &State<DbPool>,
    cookies: &CookieJar<'_>,
    form: Form<DeleteCategoryForm>,
) -> Result<Flash<Redirect>> {
    let user = auth::require_user(pool, cookies)?;
    let name = form.into_inner().name;
    let redirect = Redirect::to("/categories");
    let conn = pool.get()?;
    if db::delete_category(&conn, user.id, &name)? {
        Ok(Flash::success(redirect, format!("Category {name} deleted!")))
    } else {
        Ok(Flash::error(redirect, format!("Category {name} not found!")))
    }
}

#[get("/insights")]
fn view_insights(
    pool: &State<DbPool>,
    store: &State<SharedStore>,
    config: &State<AppConfig>,
    cookies: &CookieJar<'_>,
) -> Result<Template> {
    let user = auth::require_user(pool, cookies)?;
    let expenses = store.list(user.id, &ExpenseFilter::default())?;
    let summary = insights::summarize(&expenses);

    let mut series = summary
        .category_totals
        .iter()
        .map(|(category, amount)| (category.clone(), *amount))
        .collect::<Vec<_>>();
    if series.iter().all(|(_, amount)| *amount <= 0.0) {
        series = vec![("No Data".to_string(), 1.0)];
    }
    let category_chart = charts::pie_chart(&series);
    let trend_chart = charts::line_chart(&summary.monthly_totals, &config.currency);

    let category_rows = summary
        .category_totals
        .iter()
        .map(|(category, amount)| CategoryTotalView {
            category: category.clone(),
            amount: format_amount(*amount),
            percent: if summary.total > 0.0 {
                format!("{:.1}", amount / summary.total * 100.0)
            } else {
                "0.0".to_string()
            },
        })
        .collect::<Vec<_>>();

    let context = serde_json::json!({
        "username": user.username,
        "currency": config.currency,
        "total": format_amount(summary.total),
        "max_expense": format_amount(summary.max_expense),
        "highest_category": summary.highest_category.as_deref().unwrap_or("None"),
        "category_totals": category_rows,
        "messages": summary.messages,
        "savings_recommendation": format_amount(summary.savings_recommendation),
        "category_chart": category_chart,
        "trend_chart": trend_chart,
    });
    Ok(Template::render("insights", &context))
}

#[get("/download")]
fn download_expenses(
    pool: &State<DbPool>,
    store: &State<SharedStore>,
    cookies: &CookieJar<'_>,
) -> Result<rocket::Either<CsvDownload, Flash<Redirect>>> {
    let user = auth::require_user(pool, cookies)?;
    let expenses = store.list(user.id, &ExpenseFilter::default())?;
    if expenses.is_empty() {
        return Ok(rocket::Either::Right(Flash::error(
            Redirect::to("/expenses"),
            "No expenses to download!",
        )));
    }

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(["Category", "Amount", "Date"])?;
    for expense in &expenses {
        writer.write_record([
            expense.category.as_str(),
            format_amount(expense.amount).as_str(),
            expense.spent_at.format(TIMESTAMP_FORMAT).to_string().as_str(),
        ])?;
    }
    let body = writer.into_inner().map_err(|e| e.into_error())?;
    let filename = format!("expenses_{}.csv", user.username);
    Ok(rocket::Either::Left(CsvDownload {
        body,
        disposition: Header::new(
            "Content-Disposition",
            format!("attachment; filename=\"{filename}\""),
        ),
    }))
}

#[get("/favicon.ico")]
fn favicon() -> Status {
    Status::NoContent
}

fn open_storage(config: &AppConfig) -> Result<(DbPool, SharedStore)> {
    std::fs::create_dir_all(&config.data_dir)?;
    let pool = db::init_db(&config.db_path())?;
    let store = store::open(config, &pool)?;
    info!("data directory: {}", config.data_dir.display());
    Ok((pool, store))
}

/// Initializes the tracing subscriber. `RUST_LOG` wins when it is set.
fn init_logger() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("{}=info,rocket=info", env!("CARGO_CRATE_NAME")))
    });
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn build(figment: Figment) -> Rocket<Build> {
    rocket::custom(figment)
        .attach(AdHoc::config::<AppConfig>())
        .attach(AdHoc::try_on_ignite("Expense storage", |rocket| async move {
            let Some(config) = rocket.state::<AppConfig>().cloned() else {
                error!("application configuration is missing");
                return Err(rocket);
            };
            match open_storage(&config) {
                Ok((pool, store)) => Ok(rocket.manage(pool).manage(store)),
                Err(e) => {
                    error!("unable to open storage: {e}");
                    Err(rocket)
                }
            }
        }))
        .mount(
            "/",
            routes![
                register,
                register_post,
                login,
                login_post,
                logout,
                profile,
                profile_password,
                profile_logout_all,
                home,
                add_expense,
                view_expenses,
                delete_expense,
                clear_expenses,
                categories,
                add_category,
                delete_category,
                view_insights,
                download_expenses,
                favicon
            ],
        )
        .mount("/static", FileServer::from("static"))
        .attach(Template::fairing())
}

#[launch]
fn rocket() -> _ {
    init_logger();
    build(rocket::Config::figment())
}
