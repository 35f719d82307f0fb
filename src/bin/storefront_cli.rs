use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use storefront_api::{
    auth::{SessionConfig, SessionService},
    config::{self, AppConfig},
    db::{self, DbPool},
    entities::product::Category,
    events::EventSender,
    services::{
        catalog::{NewProduct, ProductFilter, ProductService},
        delivery::{DeliveryService, NewAgent},
        identity::{IdentityService, NewAdmin},
        orders::OrderService,
    },
};
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let context = CliContext::initialize().await?;

    match cli.command {
        Commands::Migrate => {
            db::run_migrations(&context.db)
                .await
                .context("failed to run migrations")?;
            println!("Migrations applied");
        }
        Commands::CreateAdmin(args) => handle_create_admin(&context, args, cli.json).await?,
        Commands::CreateDeliveryman(args) => {
            handle_create_deliveryman(&context, args, cli.json).await?
        }
        Commands::Seed => handle_seed(&context, cli.json).await?,
        Commands::Products(args) => handle_list_products(&context, args, cli.json).await?,
    }

    Ok(())
}

#[derive(Parser)]
#[command(name = "storefront", about = "Storefront operator CLI", version)]
struct Cli {
    #[arg(
        long,
        global = true,
        action = ArgAction::SetTrue,
        help = "Render command output as pretty JSON when available"
    )]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending database migrations
    Migrate,
    /// Create an admin account without the registration key
    CreateAdmin(CreateAdminArgs),
    /// Create a delivery agent
    CreateDeliveryman(CreateDeliverymanArgs),
    /// Insert a small demo catalog
    Seed,
    /// List catalog products
    Products(ListProductsArgs),
}

#[derive(Args)]
struct CreateAdminArgs {
    #[arg(long)]
    name: String,
    #[arg(long)]
    email: String,
    #[arg(long)]
    password: String,
}

#[derive(Args)]
struct CreateDeliverymanArgs {
    #[arg(long)]
    name: String,
    #[arg(long)]
    email: String,
    #[arg(long)]
    phone: String,
    #[arg(long)]
    password: String,
    #[arg(long)]
    vehicle_type: Option<String>,
    #[arg(long)]
    vehicle_number: Option<String>,
}

#[derive(Args)]
struct ListProductsArgs {
    #[arg(long, help = "Filter by category, e.g. Laptop")]
    category: Option<Category>,
    #[arg(long, help = "Case-insensitive search over name, category and brand")]
    search: Option<String>,
    #[arg(long, action = ArgAction::SetTrue, help = "Include inactive products")]
    all: bool,
}

struct CliContext {
    db: Arc<DbPool>,
    event_sender: Arc<EventSender>,
    config: AppConfig,
}

impl CliContext {
    async fn initialize() -> Result<Self> {
        let config = config::load_config().context("failed to load configuration")?;
        config::init_tracing(config.log_level(), false);

        let pool = db::establish_connection_from_app_config(&config)
            .await
            .context("failed to connect to the database")?;

        let (tx, rx) = mpsc::channel(config.event_channel_capacity);
        tokio::spawn(storefront_api::events::process_events(rx));

        Ok(Self {
            db: Arc::new(pool),
            event_sender: Arc::new(EventSender::new(tx)),
            config,
        })
    }

    fn identity_service(&self) -> IdentityService {
        let sessions = Arc::new(SessionService::new(
            SessionConfig::from(&self.config),
            self.db.clone(),
        ));
        // Operators bypass the registration key
        IdentityService::new(self.db.clone(), sessions, None)
    }

    fn product_service(&self) -> ProductService {
        ProductService::new(self.db.clone(), self.event_sender.clone())
    }

    fn delivery_service(&self) -> DeliveryService {
        let orders = Arc::new(OrderService::new(self.db.clone(), self.event_sender.clone()));
        DeliveryService::new(self.db.clone(), self.event_sender.clone(), orders)
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn handle_create_admin(context: &CliContext, args: CreateAdminArgs, json: bool) -> Result<()> {
    let admin = context
        .identity_service()
        .register_admin(
            None,
            NewAdmin {
                name: args.name,
                email: args.email,
                password: args.password,
            },
        )
        .await
        .context("failed to create admin")?;

    if json {
        print_json(&admin)?;
    } else {
        println!("Admin {} created (id {})", admin.email, admin.id);
    }
    Ok(())
}

async fn handle_create_deliveryman(
    context: &CliContext,
    args: CreateDeliverymanArgs,
    json: bool,
) -> Result<()> {
    let agent = context
        .delivery_service()
        .create_agent(NewAgent {
            name: args.name,
            email: args.email,
            phone: args.phone,
            password: args.password,
            vehicle_type: args.vehicle_type,
            vehicle_number: args.vehicle_number,
        })
        .await
        .context("failed to create deliveryman")?;

    if json {
        print_json(&agent)?;
    } else {
        println!("Deliveryman {} created (id {})", agent.email, agent.id);
    }
    Ok(())
}

fn demo_catalog() -> Vec<NewProduct> {
    let item = |name: &str, category: Category, brand: &str, price: Decimal, stock: i32, discount: i32| {
        NewProduct {
            name: name.to_string(),
            description: format!("{} by {}", name, brand),
            price,
            category,
            stock,
            brand: Some(brand.to_string()),
            discount,
            is_active: true,
            image_url: None,
        }
    };

    vec![
        item("Galaxy S24", Category::Smartphone, "Samsung", dec!(124999), 15, 5),
        item("Redmi Note 13", Category::Smartphone, "Xiaomi", dec!(27999), 40, 0),
        item("MacBook Air M3", Category::Laptop, "Apple", dec!(164999), 8, 0),
        item("IdeaPad Slim 3", Category::Laptop, "Lenovo", dec!(62999), 12, 10),
        item("WH-1000XM5", Category::Headphone, "Sony", dec!(42999), 20, 15),
        item("Galaxy Watch 6", Category::Smartwatch, "Samsung", dec!(32999), 10, 0),
        item("PlayStation 5", Category::Gaming, "Sony", dec!(74999), 5, 0),
        item("65\" 4K UHD TV", Category::Television, "Walton", dec!(89999), 6, 20),
    ]
}

async fn handle_seed(context: &CliContext, json: bool) -> Result<()> {
    let service = context.product_service();
    let mut created = Vec::new();
    for product in demo_catalog() {
        let name = product.name.clone();
        let saved = service
            .create(product)
            .await
            .with_context(|| format!("failed to seed {}", name))?;
        created.push(saved);
    }

    if json {
        print_json(&created)?;
    } else {
        println!("Seeded {} products", created.len());
    }
    Ok(())
}

async fn handle_list_products(
    context: &CliContext,
    args: ListProductsArgs,
    json: bool,
) -> Result<()> {
    let products = context
        .product_service()
        .list(ProductFilter {
            category: args.category,
            search: args.search,
            include_inactive: args.all,
        })
        .await
        .context("failed to list products")?;

    if json {
        return print_json(&products);
    }
    if products.is_empty() {
        println!("No products found");
        return Ok(());
    }
    for entry in &products {
        let p = &entry.product;
        println!(
            "{}  {:<28} {:<12} stock {:>4}  {} (was {})",
            p.id, p.name, p.category, p.stock, entry.effective_price, p.price
        );
    }
    Ok(())
}
