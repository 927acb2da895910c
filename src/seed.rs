use dotenvy::dotenv;
use envconfig::Envconfig;
use sqlx::PgPool;

use medicart::auth;
use medicart::config::Config;
use medicart::db;

struct PharmacySeed {
    name: &'static str,
    address: &'static str,
    contact_phone: &'static str,
    contact_email: &'static str,
}

struct UserSeed {
    email: &'static str,
    password: &'static str,
    username: &'static str,
    full_name: &'static str,
    role: &'static str,
    pharmacy: usize,
}

struct MedicationSeed {
    name: &'static str,
    category: &'static str,
    dosage: &'static str,
    price: f64,
    description: &'static str,
    stock: i32,
    prescription_required: bool,
    pharmacy: usize,
}

fn seed_pharmacies() -> Vec<PharmacySeed> {
    vec![
        PharmacySeed {
            name: "Central Pharmacy",
            address: "12 Main Street, Springfield",
            contact_phone: "15550100001",
            contact_email: "central@medicart.example",
        },
        PharmacySeed {
            name: "Riverside Pharmacy",
            address: "48 River Road, Springfield",
            contact_phone: "15550100002",
            contact_email: "riverside@medicart.example",
        },
    ]
}

fn seed_users() -> Vec<UserSeed> {
    vec![
        UserSeed {
            email: "admin@medicart.example",
            password: "Adm1n!pass",
            username: "admin",
            full_name: "Site Administrator",
            role: "admin",
            pharmacy: 0,
        },
        UserSeed {
            email: "pharmacist@medicart.example",
            password: "Ph4rm!pass",
            username: "pharmacist",
            full_name: "Lena Okafor",
            role: "pharmacist",
            pharmacy: 0,
        },
        UserSeed {
            email: "customer@medicart.example",
            password: "Cust0mer!pass",
            username: "customer",
            full_name: "Daniel Mekonnen",
            role: "customer",
            pharmacy: 0,
        },
    ]
}

fn seed_medications() -> Vec<MedicationSeed> {
    vec![
        MedicationSeed {
            name: "Aspirin",
            category: "Pain Relief",
            dosage: "325 mg",
            price: 4.99,
            description: "Pain reliever and fever reducer",
            stock: 500,
            prescription_required: false,
            pharmacy: 0,
        },
        MedicationSeed {
            name: "Amoxicillin",
            category: "Antibiotic",
            dosage: "250 mg",
            price: 12.50,
            description: "Broad-spectrum penicillin antibiotic",
            stock: 300,
            prescription_required: true,
            pharmacy: 0,
        },
        MedicationSeed {
            name: "Lisinopril",
            category: "Blood Pressure",
            dosage: "10 mg",
            price: 8.75,
            description: "ACE inhibitor for hypertension",
            stock: 400,
            prescription_required: true,
            pharmacy: 0,
        },
        MedicationSeed {
            name: "Levothyroxine",
            category: "Thyroid",
            dosage: "50 mcg",
            price: 10.25,
            description: "Thyroid hormone replacement",
            stock: 250,
            prescription_required: true,
            pharmacy: 1,
        },
        MedicationSeed {
            name: "Metformin",
            category: "Diabetes",
            dosage: "500 mg",
            price: 6.80,
            description: "First-line treatment for type 2 diabetes",
            stock: 350,
            prescription_required: true,
            pharmacy: 1,
        },
        MedicationSeed {
            name: "Omeprazole",
            category: "Digestive Health",
            dosage: "20 mg",
            price: 9.40,
            description: "Proton-pump inhibitor for acid reflux",
            stock: 450,
            prescription_required: false,
            pharmacy: 0,
        },
        MedicationSeed {
            name: "Albuterol",
            category: "Respiratory",
            dosage: "90 mcg",
            price: 24.99,
            description: "Rescue inhaler for asthma",
            stock: 150,
            prescription_required: true,
            pharmacy: 1,
        },
        MedicationSeed {
            name: "Cetirizine",
            category: "Allergy",
            dosage: "10 mg",
            price: 7.15,
            description: "Non-drowsy antihistamine",
            stock: 600,
            prescription_required: false,
            pharmacy: 1,
        },
    ]
}

async fn seed_database(pool: &PgPool) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut pharmacy_ids = Vec::new();
    for pharmacy in seed_pharmacies() {
        let id: i32 = sqlx::query_scalar(
            "INSERT INTO pharmacies (name, address, contact_phone, contact_email)
             VALUES ($1, $2, $3, $4)
             RETURNING id",
        )
        .bind(pharmacy.name)
        .bind(pharmacy.address)
        .bind(pharmacy.contact_phone)
        .bind(pharmacy.contact_email)
        .fetch_one(pool)
        .await?;
        pharmacy_ids.push(id);
    }

    for user in seed_users() {
        let hashed = auth::hash_password(user.password)?;
        sqlx::query(
            "INSERT INTO users (email, password, username, full_name, role,
                                is_verified, pharmacy_id)
             VALUES ($1, $2, $3, $4, $5, TRUE, $6)
             ON CONFLICT (email) DO NOTHING",
        )
        .bind(user.email)
        .bind(&hashed)
        .bind(user.username)
        .bind(user.full_name)
        .bind(user.role)
        .bind(pharmacy_ids[user.pharmacy])
        .execute(pool)
        .await?;
    }

    for medication in seed_medications() {
        sqlx::query(
            "INSERT INTO medications (name, category, dosage, price, description,
                                      stock_quantity, online_stock, in_person_stock,
                                      is_prescription_required, pharmacy_id)
             VALUES ($1, $2, $3, $4, $5, $6, $6, 0, $7, $8)",
        )
        .bind(medication.name)
        .bind(medication.category)
        .bind(medication.dosage)
        .bind(medication.price)
        .bind(medication.description)
        .bind(medication.stock)
        .bind(medication.prescription_required)
        .bind(pharmacy_ids[medication.pharmacy])
        .execute(pool)
        .await?;
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));
    dotenv().ok();

    let config = Config::init_from_env().map_err(|e| format!("configuration error: {}", e))?;

    let pool = db::init_db(&config.database_url).await?;
    db::run_migrations(&pool).await?;

    seed_database(&pool).await?;
    log::info!("Seed data loaded");

    Ok(())
}
